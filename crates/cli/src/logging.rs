//! Dual-layer logging: human-readable console output plus a per-stage
//! rotating log file, both through `tracing_subscriber::fmt`. The original
//! Python wrapped stdout in a flushing handler; `tracing`'s default
//! line-buffered writer already flushes per event, so no custom writer is
//! needed here.

use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(log_dir: &Path, stage: &str, debug: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{stage}.log")))?;

    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = fmt::layer().with_target(false);
    let file_layer = fmt::layer().with_writer(log_file).with_ansi(false).with_target(false);

    tracing_subscriber::registry().with(filter).with(console_layer).with(file_layer).init();

    Ok(())
}
