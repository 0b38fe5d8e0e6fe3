//! Builds the layered [`ParamStore`] each stage reads: `paths.txt` plus
//! that stage's own `*par.txt` file, with the declared schema for every
//! key named in the external interface.

use param_store::{ParamStore, ParamType};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn schema() -> HashMap<&'static str, ParamType> {
    let mut s = HashMap::new();

    // File paths.
    for key in [
        "FINDB_FILE",
        "TICKERS_FILE",
        "BENCHMARKS_FILE",
        "FINANCIALS_DB_FILE",
        "SCORED_STOCKS_DB_FILE",
        "SECTOR_PE_DB_FILE",
        "CORRELATION_MATRIX_FILE",
        "PORTFOLIO_RESULTS_DB_FILE",
        "WEB_ACCESSIBLE_DATA_PATH",
        "LEDGER_FILE",
        "LATEST_RUN_SUMMARY_FILE",
        "SKIPPED_TICKERS_FILE",
        "OPTIMIZED_RECOMMENDATION_FILE",
        "OPTIMIZED_PORTFOLIO_HISTORY_FILE",
        "BACKTEST_RESULTS_FILE",
        "BACKTEST_EQUITY_CURVE_FILE",
        "RUN_CHECKPOINT_FILE",
        "DOWNLOAD_LOG_FILE",
        "SCORE_LOG_FILE",
        "PORTFOLIO_LOG_FILE",
        "BACKTEST_LOG_FILE",
        "OPTIMIZE_LOG_FILE",
        "DOWNLOAD_PROGRESS_JSON_FILE",
        "SCORE_PROGRESS_JSON_FILE",
        "PORTFOLIO_PROGRESS_JSON_FILE",
        "BACKTEST_PROGRESS_JSON_FILE",
        "OPTIMIZE_PROGRESS_JSON_FILE",
        "DOWNLOAD_PERFORMANCE_FILE",
        "SCORE_PERFORMANCE_FILE",
        "PORTFOLIO_PERFORMANCE_FILE",
    ] {
        s.insert(key, ParamType::Path);
    }

    // Domain parameters.
    s.insert("history_years", ParamType::Int);
    s.insert("download_concurrency", ParamType::Int);
    s.insert("risk_free_rate", ParamType::Float);
    s.insert("momentum_window_days", ParamType::Int);
    s.insert("sim_runs", ParamType::Int);
    s.insert("adaptive_sim_enabled", ParamType::Bool);
    s.insert("progressive_min_sims", ParamType::Int);
    s.insert("progressive_base_log_k", ParamType::Float);
    s.insert("progressive_max_sims_cap", ParamType::Int);
    s.insert("progressive_convergence_window", ParamType::Int);
    s.insert("progressive_convergence_delta", ParamType::Float);
    s.insert("progressive_check_interval", ParamType::Int);
    s.insert("top_n_percent_refinement", ParamType::Float);
    s.insert("heuristic_threshold_k", ParamType::Int);
    s.insert("initial_scan_sims", ParamType::Int);
    s.insert("early_discard_factor", ParamType::Float);
    s.insert("early_discard_min_best_sharpe", ParamType::Float);
    s.insert("min_stocks", ParamType::Int);
    s.insert("max_stocks", ParamType::Int);
    s.insert("max_stocks_per_sector", ParamType::Int);
    s.insert("ga_population_size", ParamType::Int);
    s.insert("ga_num_generations", ParamType::Int);
    s.insert("ga_mutation_rate", ParamType::Float);
    s.insert("ga_crossover_rate", ParamType::Float);
    s.insert("ga_elitism_count", ParamType::Int);
    s.insert("ga_tournament_size", ParamType::Int);
    s.insert("ga_convergence_generations", ParamType::Int);
    s.insert("ga_convergence_tolerance", ParamType::Float);
    s.insert("initial_investment", ParamType::Float);
    s.insert("auto_regime", ParamType::Bool);
    s.insert("profile_strength", ParamType::Float);
    s.insert("weight_expected_return", ParamType::Float);
    s.insert("weight_sharpe_ratio", ParamType::Float);
    s.insert("weight_momentum", ParamType::Float);
    s.insert("min_excess_return_threshold", ParamType::Float);
    s.insert("transaction_cost_mode", ParamType::Str);
    s.insert("transaction_cost_min_transactions", ParamType::Int);
    s.insert("transaction_cost_min_months", ParamType::Int);
    s.insert("transaction_cost_fixed_pct", ParamType::Float);
    s.insert("num_candidate_portfolios", ParamType::Int);
    s.insert("benchmark_ticker", ParamType::Str);
    s.insert("quote_base_url", ParamType::Str);
    s.insert("history_base_url", ParamType::Str);
    s.insert("SPECIAL_MARKET_CLOSURES", ParamType::Str);
    s.insert("risk_profile", ParamType::Str);

    s
}

/// Load `paths.txt` plus the stage-specific `extra` files layered on top,
/// resolved against `params_dir`'s parent as repo root (matching the
/// teacher's `ParamStore::load` convention: path-like values resolve
/// relative to the repo, not the parameters directory itself).
pub fn load(params_dir: &Path, extra: &[&str]) -> anyhow::Result<ParamStore> {
    let repo_root = params_dir.parent().unwrap_or(params_dir);

    let mut files: Vec<PathBuf> = vec![params_dir.join("paths.txt")];
    for name in extra {
        files.push(params_dir.join(name));
    }

    Ok(ParamStore::load(&files, &schema(), repo_root)?)
}
