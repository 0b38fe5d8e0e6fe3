use crate::progress::ProgressWriter;
use crate::run_id::new_run_id;
use crate::{io, params};
use chrono::Utc;
use domain::LatestRunSummary;
use master_db::MasterDb;
use portfolio_engine::{
    build_best_portfolio_details, build_portfolio_result, run_portfolio_search, EngineInput, EnrichmentInputs, GaConfig,
    SimulationConfig,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

fn ga_config_from_store(store: &param_store::ParamStore) -> GaConfig {
    let defaults = GaConfig::default();
    GaConfig {
        population_size: store.get_int("ga_population_size", defaults.population_size as i64) as usize,
        num_generations: store.get_int("ga_num_generations", defaults.num_generations as i64) as usize,
        mutation_rate: store.get_float("ga_mutation_rate", defaults.mutation_rate),
        crossover_rate: store.get_float("ga_crossover_rate", defaults.crossover_rate),
        elitism_count: store.get_int("ga_elitism_count", defaults.elitism_count as i64) as usize,
        tournament_size: store.get_int("ga_tournament_size", defaults.tournament_size as i64) as usize,
        convergence_generations: store.get_int("ga_convergence_generations", defaults.convergence_generations as i64) as usize,
        convergence_tolerance: store.get_float("ga_convergence_tolerance", defaults.convergence_tolerance),
        ..defaults
    }
}

fn sim_config_from_store(store: &param_store::ParamStore) -> SimulationConfig {
    let defaults = SimulationConfig::default();
    SimulationConfig {
        sim_runs: store.get_int("sim_runs", defaults.sim_runs as i64) as usize,
        adaptive_sim_enabled: store.get_bool("adaptive_sim_enabled", defaults.adaptive_sim_enabled),
        progressive_min_sims: store.get_int("progressive_min_sims", defaults.progressive_min_sims as i64) as usize,
        progressive_base_log_k: store.get_float("progressive_base_log_k", defaults.progressive_base_log_k),
        progressive_max_sims_cap: store.get_int("progressive_max_sims_cap", defaults.progressive_max_sims_cap as i64) as usize,
        progressive_convergence_window: store
            .get_int("progressive_convergence_window", defaults.progressive_convergence_window as i64)
            as usize,
        progressive_convergence_delta: store.get_float("progressive_convergence_delta", defaults.progressive_convergence_delta),
        progressive_check_interval: store.get_int("progressive_check_interval", defaults.progressive_check_interval as i64) as usize,
        top_n_percent_refinement: store.get_float("top_n_percent_refinement", defaults.top_n_percent_refinement),
        heuristic_threshold_k: store.get_int("heuristic_threshold_k", defaults.heuristic_threshold_k as i64) as usize,
        initial_scan_sims: store.get_int("initial_scan_sims", defaults.initial_scan_sims as i64) as usize,
        early_discard_factor: store.get_float("early_discard_factor", defaults.early_discard_factor),
        early_discard_min_best_sharpe: store.get_float("early_discard_min_best_sharpe", defaults.early_discard_min_best_sharpe),
        risk_free_rate: store.get_float("risk_free_rate", defaults.risk_free_rate),
        max_stocks_per_sector: {
            let v = store.get_int("max_stocks_per_sector", -1);
            if v > 0 {
                Some(v as usize)
            } else {
                None
            }
        },
    }
}

pub async fn run(params_dir: &Path, debug: bool) -> anyhow::Result<()> {
    let store = params::load(params_dir, &["portpar.txt"])?;

    let log_dir = PathBuf::from(store.get_str("PORTFOLIO_LOG_FILE", "./logs")).parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("./logs"));
    let progress_path = PathBuf::from(store.get_str("PORTFOLIO_PROGRESS_JSON_FILE", "./data/portfolio_progress.json"));

    crate::stages::run_stage("portfolio", params_dir, &log_dir, &progress_path, debug, |mut progress: ProgressWriter| async move {
        let findb_path = PathBuf::from(store.get_str("FINDB_FILE", "./findb/master_db.csv"));
        let financials_path = PathBuf::from(store.get_str("FINANCIALS_DB_FILE", "./findb/financials.csv"));
        let scored_stocks_path = PathBuf::from(store.get_str("SCORED_STOCKS_DB_FILE", "./findb/scored_stocks.csv"));
        let portfolio_results_path = PathBuf::from(store.get_str("PORTFOLIO_RESULTS_DB_FILE", "./findb/portfolio_results.csv"));
        let latest_run_summary_path = PathBuf::from(store.get_str("LATEST_RUN_SUMMARY_FILE", "./findb/latest_run_summary.json"));

        let universe = io::read_latest_scored_stocks(&scored_stocks_path)?;
        if universe.is_empty() {
            anyhow::bail!("no scored stocks available; run `score` first");
        }

        let master_db = MasterDb::load(&findb_path)?;
        let financials = io::read_financials_db(&financials_path)?;

        let tickers: Vec<String> = universe.iter().map(|s| s.ticker.clone()).collect();
        let sectors: HashMap<String, String> = universe.iter().map(|s| (s.ticker.clone(), s.sector.clone())).collect();

        let mut returns_matrix = Vec::with_capacity(tickers.len());
        let mut aligned_tickers = Vec::with_capacity(tickers.len());
        for ticker in &tickers {
            let closes: Vec<f64> = master_db.rows_for(ticker).iter().map(|r| r.close).collect();
            let returns = portfolio_math::daily_returns(&closes);
            if returns.len() >= 20 {
                returns_matrix.push(returns);
                aligned_tickers.push(ticker.clone());
            }
        }

        let min_stocks = store.get_int("min_stocks", 5) as usize;
        let max_stocks = store.get_int("max_stocks", 15) as usize;
        let sim_config = sim_config_from_store(&store);
        let ga_config = ga_config_from_store(&store);
        let initial_investment = store.get_float("initial_investment", 10_000.0);

        let input = EngineInput {
            tickers: &aligned_tickers,
            sectors: &sectors,
            returns_matrix: &returns_matrix,
            k_min: min_stocks,
            k_max: max_stocks.min(aligned_tickers.len()),
            heuristic_threshold_k: sim_config.heuristic_threshold_k,
            max_stocks_per_sector: sim_config.max_stocks_per_sector,
        };

        let seed = Utc::now().timestamp() as u64;
        let outcome = run_portfolio_search(&input, &sim_config, &ga_config, seed)
            .ok_or_else(|| anyhow::anyhow!("portfolio search found no feasible combination"))?;

        let run_id = new_run_id("portfolio");
        let timestamp = Utc::now().to_rfc3339();

        let result = build_portfolio_result(&outcome, &run_id, &timestamp, ENGINE_VERSION, min_stocks, max_stocks);
        io::write_portfolio_result(&portfolio_results_path, &result)?;

        let momentum = io::momentum_by_ticker(&master_db, &outcome.stocks, 252);
        let forward_pe: HashMap<String, f64> =
            financials.iter().filter_map(|(t, f)| f.forward_pe.map(|v| (t.clone(), v))).collect();
        let dividend_yield: HashMap<String, f64> =
            financials.iter().filter_map(|(t, f)| f.dividend_yield.map(|v| (t.clone(), v))).collect();
        let benchmark_forward_pe = financials
            .iter()
            .find(|(t, _)| t.contains("BVSP") || t.contains("IBOV"))
            .and_then(|(_, f)| f.forward_pe);

        let enrichment = EnrichmentInputs {
            sectors: &sectors,
            momentum: &momentum,
            forward_pe: &forward_pe,
            dividend_yield: &dividend_yield,
            benchmark_forward_pe,
            initial_investment,
        };
        let details = build_best_portfolio_details(&outcome, &enrichment);

        let summary = LatestRunSummary { run_id: run_id.clone(), timestamp: timestamp.clone(), best_portfolio_details: details };
        domain::write_json_atomic(&latest_run_summary_path, &summary)?;

        progress.update(json!({
            "run_id": run_id,
            "stocks": outcome.stocks,
            "sharpe_ratio": outcome.sharpe,
        }))?;

        Ok(progress)
    })
    .await
}
