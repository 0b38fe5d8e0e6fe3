use crate::progress::ProgressWriter;
use crate::run_id::new_run_id;
use crate::{io, params};
use chrono::Utc;
use domain::LatestRunSummary;
use master_db::MasterDb;
use optimizer::{compute_holdings_metrics, optimize, recompute_ideal_metrics, OptimizerConfig, TransactionCostMode};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Flat per-run row for the append-only history CSV; `transactions` don't
/// fit a flat row, so they're serialized as a compact summary string.
#[derive(Serialize)]
struct HistoryRow {
    run_id: String,
    timestamp: String,
    decision: String,
    reason: String,
    blend_ratio: f64,
    holdings_expected_return_pct: f64,
    holdings_sharpe_ratio: f64,
    optimal_expected_return_pct: f64,
    optimal_sharpe_ratio: f64,
    transition_cost_pct: f64,
    transaction_count: usize,
}

fn cost_mode_from_store(store: &param_store::ParamStore) -> TransactionCostMode {
    match store.get_str("transaction_cost_mode", "dynamic").to_lowercase().as_str() {
        "fixed" => TransactionCostMode::Fixed,
        _ => TransactionCostMode::Dynamic,
    }
}

fn optimizer_config_from_store(store: &param_store::ParamStore) -> OptimizerConfig {
    let defaults = OptimizerConfig::default();
    OptimizerConfig {
        weight_expected_return: store.get_float("weight_expected_return", defaults.weight_expected_return),
        weight_sharpe_ratio: store.get_float("weight_sharpe_ratio", defaults.weight_sharpe_ratio),
        weight_momentum: store.get_float("weight_momentum", defaults.weight_momentum),
        min_excess_return_threshold: store.get_float("min_excess_return_threshold", defaults.min_excess_return_threshold),
        transaction_cost_mode: cost_mode_from_store(store),
        transaction_cost_min_transactions: store
            .get_int("transaction_cost_min_transactions", defaults.transaction_cost_min_transactions as i64)
            as usize,
        transaction_cost_min_months: store.get_int("transaction_cost_min_months", defaults.transaction_cost_min_months),
        transaction_cost_fixed_pct: store.get_float("transaction_cost_fixed_pct", defaults.transaction_cost_fixed_pct),
        num_candidate_portfolios: store.get_int("num_candidate_portfolios", defaults.num_candidate_portfolios as i64) as usize,
    }
}

pub async fn run(params_dir: &Path, debug: bool) -> anyhow::Result<()> {
    let store = params::load(params_dir, &["optpar.txt"])?;

    let log_dir = PathBuf::from(store.get_str("OPTIMIZE_LOG_FILE", "./logs")).parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("./logs"));
    let progress_path = PathBuf::from(store.get_str("OPTIMIZE_PROGRESS_JSON_FILE", "./data/optimize_progress.json"));

    crate::stages::run_stage("optimize", params_dir, &log_dir, &progress_path, debug, |mut progress: ProgressWriter| async move {
        let findb_path = PathBuf::from(store.get_str("FINDB_FILE", "./findb/master_db.csv"));
        let financials_path = PathBuf::from(store.get_str("FINANCIALS_DB_FILE", "./findb/financials.csv"));
        let ledger_path = PathBuf::from(store.get_str("LEDGER_FILE", "./data/ledger.csv"));
        let latest_run_summary_path = PathBuf::from(store.get_str("LATEST_RUN_SUMMARY_FILE", "./findb/latest_run_summary.json"));
        let recommendation_path = PathBuf::from(store.get_str("OPTIMIZED_RECOMMENDATION_FILE", "./findb/optimized_recommendation.json"));
        let history_path = PathBuf::from(store.get_str("OPTIMIZED_PORTFOLIO_HISTORY_FILE", "./findb/optimized_portfolio_history.csv"));

        let ledger = io::read_ledger(&ledger_path)?;
        let positions = io::positions_from_ledger(&ledger);

        let master_db = MasterDb::load(&findb_path)?;
        let financials = io::read_financials_db(&financials_path)?;

        let held_tickers: Vec<String> = positions.iter().map(|p| p.ticker.clone()).collect();
        let current_prices = io::prices_by_ticker(&master_db, &held_tickers);
        let target_prices: std::collections::HashMap<String, f64> =
            financials.iter().filter_map(|(t, f)| f.target_price.map(|v| (t.clone(), v))).collect();
        let fallback_returns = io::momentum_by_ticker(&master_db, &held_tickers, 126);
        let holdings_returns = io::holdings_daily_returns(&ledger, &master_db);

        let holdings = compute_holdings_metrics(&positions, &current_prices, &target_prices, &fallback_returns, &holdings_returns)?;

        let summary_contents = std::fs::read_to_string(&latest_run_summary_path)
            .map_err(|_| anyhow::anyhow!("no latest run summary found; run `portfolio` first"))?;
        let summary: LatestRunSummary = serde_json::from_str(&summary_contents)?;
        let details = summary.best_portfolio_details;

        let ideal_current_prices = io::prices_by_ticker(&master_db, &details.stocks);
        let ideal = recompute_ideal_metrics(
            &details.stocks,
            &details.weights,
            &ideal_current_prices,
            &target_prices,
            details.expected_return_annual_pct,
            details.sharpe_ratio,
        )?;

        let all_momentum_tickers: Vec<String> = holdings.weights.keys().chain(ideal.weights.keys()).cloned().collect();
        let momentum_12m = io::momentum_by_ticker(&master_db, &all_momentum_tickers, 252);

        let config = optimizer_config_from_store(&store);
        let run_id = new_run_id("optimize");
        let timestamp = Utc::now().to_rfc3339();
        let today = Utc::now().date_naive();

        let recommendation = optimize(&holdings, &ideal, &momentum_12m, &ledger, today, &config, &run_id, &timestamp);
        domain::write_json_atomic(&recommendation_path, &recommendation)?;
        io::append_csv(
            &history_path,
            &[HistoryRow {
                run_id: recommendation.run_id.clone(),
                timestamp: recommendation.timestamp.clone(),
                decision: format!("{:?}", recommendation.decision),
                reason: recommendation.reason.clone(),
                blend_ratio: recommendation.blend_ratio,
                holdings_expected_return_pct: recommendation.holdings_expected_return_pct,
                holdings_sharpe_ratio: recommendation.holdings_sharpe_ratio,
                optimal_expected_return_pct: recommendation.optimal_expected_return_pct,
                optimal_sharpe_ratio: recommendation.optimal_sharpe_ratio,
                transition_cost_pct: recommendation.transition_cost_pct,
                transaction_count: recommendation.transactions.len(),
            }],
        )?;

        progress.update(json!({
            "run_id": run_id,
            "decision": format!("{:?}", recommendation.decision),
            "transaction_count": recommendation.transactions.len(),
        }))?;

        Ok(progress)
    })
    .await
}
