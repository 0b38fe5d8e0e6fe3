use crate::progress::ProgressWriter;
use crate::{io, params};
use chrono::Utc;
use master_db::MasterDb;
use regime_detector::{blend_weights, detect_regime, ProfileTendencies, RegimeThresholds};
use scorer::{cross_universe_mean_returns, score_universe, MetricWeights, ScorerConfig};
use crate::run_id::new_run_id;
use serde_json::json;
use std::path::{Path, PathBuf};

const REGIME_LOOKBACK_DAYS: usize = 60;

fn benchmark_daily_returns(master_db: &MasterDb, tickers: &[domain::Ticker]) -> Vec<f64> {
    let benchmark = tickers.iter().find(|t| t.symbol.contains("BVSP") || t.symbol.contains("IBOV"));
    match benchmark {
        Some(t) => {
            let closes: Vec<f64> = master_db.rows_for(&t.symbol).iter().map(|r| r.close).collect();
            portfolio_math::daily_returns(&closes)
        }
        None => cross_universe_mean_returns(master_db, tickers),
    }
}

pub async fn run(params_dir: &Path, debug: bool) -> anyhow::Result<()> {
    let store = params::load(params_dir, &["scorpar.txt", "risk_profile.txt"])?;

    let log_dir = PathBuf::from(store.get_str("SCORE_LOG_FILE", "./logs")).parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("./logs"));
    let progress_path = PathBuf::from(store.get_str("SCORE_PROGRESS_JSON_FILE", "./data/score_progress.json"));

    crate::stages::run_stage("score", params_dir, &log_dir, &progress_path, debug, |mut progress: ProgressWriter| async move {
        let tickers_path = PathBuf::from(store.get_str("TICKERS_FILE", "./parameters/tickers.txt"));
        let findb_path = PathBuf::from(store.get_str("FINDB_FILE", "./findb/master_db.csv"));
        let financials_path = PathBuf::from(store.get_str("FINANCIALS_DB_FILE", "./findb/financials.csv"));
        let scored_stocks_path = PathBuf::from(store.get_str("SCORED_STOCKS_DB_FILE", "./findb/scored_stocks.csv"));
        let sector_pe_path = PathBuf::from(store.get_str("SECTOR_PE_DB_FILE", "./findb/sector_pe.csv"));
        let correlation_path = PathBuf::from(store.get_str("CORRELATION_MATRIX_FILE", "./findb/correlation_matrix.csv"));

        let tickers = io::read_tickers_file(&tickers_path)?;
        let master_db = MasterDb::load(&findb_path)?;
        let financials = io::read_financials_db(&financials_path)?;

        let risk_free_rate = store.get_float("risk_free_rate", 0.0);
        let momentum_window_days = store.get_int("momentum_window_days", 126) as usize;

        let risk_profile_used = store.get_str("risk_profile", "moderado");

        let static_weights = MetricWeights::default();
        let (weights, market_regime) = if store.get_bool("auto_regime", true) {
            let benchmark_returns = benchmark_daily_returns(&master_db, &tickers);
            let regime = detect_regime(&benchmark_returns, REGIME_LOOKBACK_DAYS, RegimeThresholds::default());
            let profile_strength = store.get_float("profile_strength", 0.4);
            let blended = blend_weights(
                (static_weights.sharpe, static_weights.upside, static_weights.momentum),
                ProfileTendencies::default(),
                profile_strength,
                Some(regime),
            );
            tracing::info!(?regime, "regime detected for this run");
            let regime_label = match serde_json::to_value(regime)? {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (MetricWeights { sharpe: blended.0, upside: blended.1, momentum: blended.2 }, regime_label)
        } else {
            (static_weights, "unknown".to_string())
        };

        let run_id = new_run_id("score");
        let timestamp = Utc::now().to_rfc3339();

        let config = ScorerConfig { risk_free_rate, momentum_window_days, weights, risk_profile_used, market_regime };
        let output = score_universe(&tickers, &master_db, &financials, &config, &run_id, &timestamp)?;

        io::write_scored_stocks(&scored_stocks_path, &output.scored)?;
        io::write_sector_pe(&sector_pe_path, &output.sector_pe)?;
        io::write_correlation_matrix(&correlation_path, &output.correlation_tickers, &output.correlation_matrix)?;

        progress.update(json!({
            "run_id": run_id,
            "scored_count": output.scored.len(),
            "sector_count": output.sector_pe.len(),
        }))?;

        Ok(progress)
    })
    .await
}
