use crate::progress::ProgressWriter;
use crate::{io, params};
use backtester::run_backtest;
use domain::{LatestRunSummary, PortfolioResult};
use master_db::MasterDb;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
struct BacktestResultRow {
    run_id: String,
    total_return_pct: f64,
    cagr_pct: f64,
    annualized_vol_pct: f64,
    sharpe_ratio: f64,
    max_drawdown_pct: f64,
    benchmark_total_return_pct: f64,
    benchmark_cagr_pct: f64,
    benchmark_sharpe_ratio: f64,
}

#[derive(Serialize)]
struct EquityCurveRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Portfolio")]
    portfolio: f64,
    #[serde(rename = "Benchmark")]
    benchmark: f64,
    run_id: String,
}

pub async fn run(params_dir: &Path, debug: bool) -> anyhow::Result<()> {
    let store = params::load(params_dir, &["backpar.txt"])?;

    let log_dir = PathBuf::from(store.get_str("BACKTEST_LOG_FILE", "./logs")).parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("./logs"));
    let progress_path = PathBuf::from(store.get_str("BACKTEST_PROGRESS_JSON_FILE", "./data/backtest_progress.json"));

    crate::stages::run_stage("backtest", params_dir, &log_dir, &progress_path, debug, |mut progress: ProgressWriter| async move {
        let findb_path = PathBuf::from(store.get_str("FINDB_FILE", "./findb/master_db.csv"));
        let latest_run_summary_path = PathBuf::from(store.get_str("LATEST_RUN_SUMMARY_FILE", "./findb/latest_run_summary.json"));
        let results_path = PathBuf::from(store.get_str("BACKTEST_RESULTS_FILE", "./findb/backtest_results.csv"));
        let equity_curve_path = PathBuf::from(store.get_str("BACKTEST_EQUITY_CURVE_FILE", "./findb/backtest_equity_curve.csv"));
        let benchmark_ticker = store.get_str("benchmark_ticker", "BVSP.SA");
        let initial_investment = store.get_float("initial_investment", 10_000.0);

        let summary_contents = std::fs::read_to_string(&latest_run_summary_path)
            .map_err(|_| anyhow::anyhow!("no latest run summary found; run `portfolio` first"))?;
        let summary: LatestRunSummary = serde_json::from_str(&summary_contents)?;
        let details = summary.best_portfolio_details;

        let master_db = MasterDb::load(&findb_path)?;

        let mut stock_closes: HashMap<String, Vec<(chrono::NaiveDate, f64)>> = HashMap::new();
        for ticker in &details.stocks {
            stock_closes.insert(ticker.clone(), io::closes_series(&master_db, ticker));
        }
        let benchmark_closes = io::closes_series(&master_db, &benchmark_ticker);
        if benchmark_closes.is_empty() {
            anyhow::bail!("no price history for benchmark ticker '{benchmark_ticker}'");
        }

        let run_id = summary.run_id.clone();
        let portfolio = PortfolioResult {
            run_id: run_id.clone(),
            timestamp: summary.timestamp.clone(),
            engine_version: ENGINE_VERSION.to_string(),
            min_stocks: details.stocks.len(),
            max_stocks: details.stocks.len(),
            stocks: details.stocks.clone(),
            weights: details.weights.clone(),
            sharpe_ratio: details.sharpe_ratio,
            expected_return_annual_pct: details.expected_return_annual_pct,
            expected_volatility_annual_pct: details.expected_volatility_annual_pct,
        };

        let result = run_backtest(&portfolio, &stock_closes, &benchmark_closes, initial_investment, &run_id)
            .ok_or_else(|| anyhow::anyhow!("backtest produced no overlapping date range"))?;

        io::append_csv(
            &results_path,
            &[BacktestResultRow {
                run_id: run_id.clone(),
                total_return_pct: result.portfolio.total_return_pct,
                cagr_pct: result.portfolio.cagr_pct,
                annualized_vol_pct: result.portfolio.annualized_vol_pct,
                sharpe_ratio: result.portfolio.sharpe_ratio,
                max_drawdown_pct: result.portfolio.max_drawdown_pct,
                benchmark_total_return_pct: result.benchmark.total_return_pct,
                benchmark_cagr_pct: result.benchmark.cagr_pct,
                benchmark_sharpe_ratio: result.benchmark.sharpe_ratio,
            }],
        )?;

        let curve_rows: Vec<EquityCurveRow> = result
            .dates
            .iter()
            .zip(result.equity_curve_portfolio.iter())
            .zip(result.equity_curve_benchmark.iter())
            .map(|((date, p), b)| EquityCurveRow { date: date.to_string(), portfolio: *p, benchmark: *b, run_id: run_id.clone() })
            .collect();
        io::append_csv(&equity_curve_path, &curve_rows)?;

        progress.update(json!({
            "run_id": run_id,
            "total_return_pct": result.portfolio.total_return_pct,
            "sharpe_ratio": result.portfolio.sharpe_ratio,
        }))?;

        Ok(progress)
    })
    .await
}
