mod checkpoint;
mod io;
mod logging;
mod params;
mod progress;
mod remote_sync;
mod run_id;
mod stages;

use clap::{Parser, Subcommand};
use domain::StageStatus;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "portfolio-esg", about = "B3 portfolio construction pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Directory holding the layered `key=value` parameter files.
    #[arg(long, default_value = "./parameters")]
    params_dir: PathBuf,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,
}

#[derive(clap::Args)]
struct RunnerArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Run a single stage instead of the full pipeline.
    #[arg(long, value_enum)]
    stage: Option<Stage>,

    /// Skip the remote sync step before/after the run.
    #[arg(long)]
    skip_sync: bool,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum Stage {
    Download,
    Score,
    Portfolio,
    Backtest,
    Optimize,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring MasterDB up to date through the previous business day.
    Download(CommonArgs),
    /// Score the ticker universe and persist rankings.
    Score(CommonArgs),
    /// Search for the best portfolio and persist the run summary.
    Portfolio(CommonArgs),
    /// Backtest the latest ideal portfolio against a benchmark.
    Backtest(CommonArgs),
    /// Compare current holdings against the ideal portfolio.
    Optimize(CommonArgs),
    /// Run every stage in sequence, with checkpointing and retry.
    Runner(RunnerArgs),
}

async fn dispatch_stage(stage: Stage, params_dir: &PathBuf, debug: bool) -> anyhow::Result<()> {
    match stage {
        Stage::Download => stages::download::run(params_dir, debug).await,
        Stage::Score => stages::score::run(params_dir, debug).await,
        Stage::Portfolio => stages::portfolio::run(params_dir, debug).await,
        Stage::Backtest => stages::backtest::run(params_dir, debug).await,
        Stage::Optimize => stages::optimize::run(params_dir, debug).await,
    }
}

const PIPELINE: [Stage; 5] = [Stage::Download, Stage::Score, Stage::Portfolio, Stage::Backtest, Stage::Optimize];

fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Download => "download",
        Stage::Score => "score",
        Stage::Portfolio => "portfolio",
        Stage::Backtest => "backtest",
        Stage::Optimize => "optimize",
    }
}

async fn run_runner(args: RunnerArgs) -> anyhow::Result<()> {
    let checkpoint_path = args.common.params_dir.parent().unwrap_or(&args.common.params_dir).join("data/run_checkpoint.json");

    let sync: Box<dyn remote_sync::RemoteSync> = if args.skip_sync { Box::new(remote_sync::NoopRemoteSync) } else { remote_sync::resolve() };
    sync.sync_down("./data").await.ok();

    let stages: Vec<Stage> = match args.stage {
        Some(stage) => vec![stage],
        None => PIPELINE.to_vec(),
    };

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    for stage in stages {
        let name = stage_name(stage);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            checkpoint::write(&checkpoint_path, name, StageStatus::Running, None, attempt)?;

            let result = tokio::select! {
                r = dispatch_stage(stage, &args.common.params_dir, args.common.debug) => r,
                _ = tokio::signal::ctrl_c() => {
                    checkpoint::write(&checkpoint_path, name, StageStatus::Interrupted, None, attempt)?;
                    tracing::warn!(stage = name, "interrupted by SIGINT, exiting");
                    std::process::exit(130);
                }
                #[cfg(unix)]
                _ = sigterm.recv() => {
                    checkpoint::write(&checkpoint_path, name, StageStatus::Interrupted, None, attempt)?;
                    tracing::warn!(stage = name, "interrupted by SIGTERM, exiting");
                    std::process::exit(143);
                }
            };

            match result {
                Ok(()) => {
                    checkpoint::write(&checkpoint_path, name, StageStatus::Completed, None, attempt)?;
                    break;
                }
                Err(e) => {
                    checkpoint::write(&checkpoint_path, name, StageStatus::Failed, Some(e.to_string()), attempt)?;
                    if attempt >= 3 {
                        return Err(e.context(format!("stage '{name}' failed after {attempt} attempts")));
                    }
                    let backoff = checkpoint::retry_backoff_secs(attempt);
                    tracing::warn!(stage = name, attempt, backoff_secs = backoff, error = %e, "stage failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
                }
            }
        }
    }

    sync.sync_up("./data").await.ok();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Download(args) => stages::download::run(&args.params_dir, args.debug).await,
        Commands::Score(args) => stages::score::run(&args.params_dir, args.debug).await,
        Commands::Portfolio(args) => stages::portfolio::run(&args.params_dir, args.debug).await,
        Commands::Backtest(args) => stages::backtest::run(&args.params_dir, args.debug).await,
        Commands::Optimize(args) => stages::optimize::run(&args.params_dir, args.debug).await,
        Commands::Runner(args) => run_runner(args).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
