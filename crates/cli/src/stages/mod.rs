pub mod backtest;
pub mod download;
pub mod optimize;
pub mod portfolio;
pub mod score;

use crate::progress::ProgressWriter;
use chrono::Utc;
use serde_json::json;
use std::future::Future;
use std::path::Path;

/// Wrap one stage's body with the shared logging/progress/error-reporting
/// contract: init logging, mark the progress doc Running, run the body,
/// and on failure mark it Failed with the error message before
/// propagating — matching every `original_source/engines/*.py::main`'s
/// top-level try/except/finally.
pub async fn run_stage<F, Fut>(
    stage: &str,
    params_dir: &Path,
    log_dir: &Path,
    progress_path: &Path,
    debug: bool,
    body: F,
) -> anyhow::Result<()>
where
    F: FnOnce(ProgressWriter) -> Fut,
    Fut: Future<Output = anyhow::Result<ProgressWriter>>,
{
    crate::logging::init(log_dir, stage, debug)?;
    tracing::info!(stage, params_dir = %params_dir.display(), "starting stage");

    let mut progress = ProgressWriter::new(progress_path);
    progress.update(json!({"stage": stage, "status": "Running", "started_at": Utc::now().to_rfc3339()}))?;

    match body(progress).await {
        Ok(mut progress) => {
            progress.update(json!({"status": "Completed", "finished_at": Utc::now().to_rfc3339()}))?;
            tracing::info!(stage, "stage completed");
            Ok(())
        }
        Err(e) => {
            let mut progress = ProgressWriter::load_or_new(progress_path);
            let _ = progress.update(json!({
                "status": "Failed",
                "status_message": e.to_string(),
                "finished_at": Utc::now().to_rfc3339(),
            }));
            tracing::error!(stage, error = %e, "stage failed");
            Err(e)
        }
    }
}
