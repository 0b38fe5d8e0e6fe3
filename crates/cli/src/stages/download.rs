use crate::progress::ProgressWriter;
use crate::{io, params};
use chrono::Utc;
use downloader::HttpPriceProvider;
use master_db::MasterDb;
use serde_json::json;
use skip_store::SkipStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub async fn run(params_dir: &Path, debug: bool) -> anyhow::Result<()> {
    let store = params::load(params_dir, &["downpar.txt"])?;

    let log_dir = PathBuf::from(store.get_str("DOWNLOAD_LOG_FILE", "./logs")).parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("./logs"));
    let progress_path = PathBuf::from(store.get_str("DOWNLOAD_PROGRESS_JSON_FILE", "./data/download_progress.json"));

    crate::stages::run_stage("download", params_dir, &log_dir, &progress_path, debug, |mut progress: ProgressWriter| async move {
        let findb_path = PathBuf::from(store.get_str("FINDB_FILE", "./findb/master_db.csv"));
        let financials_path = PathBuf::from(store.get_str("FINANCIALS_DB_FILE", "./findb/financials.csv"));
        let skip_path = PathBuf::from(store.get_str("SKIPPED_TICKERS_FILE", "./findb/skipped_tickers.json"));
        let tickers_path = PathBuf::from(store.get_str("TICKERS_FILE", "./parameters/tickers.txt"));
        let benchmarks_path = PathBuf::from(store.get_str("BENCHMARKS_FILE", "./parameters/benchmarks.txt"));

        let history_years = store.get_int("history_years", 5);
        let concurrency = store.get_int("download_concurrency", 4).max(1) as usize;
        let quote_base_url = store.get_str("quote_base_url", "https://quote.example.invalid");
        let history_base_url = store.get_str("history_base_url", "https://history.example.invalid");
        let special_closures = calendar::parse_special_closures(&store.get_str("SPECIAL_MARKET_CLOSURES", ""));

        let mut tickers: Vec<String> = io::read_tickers_file(&tickers_path)?.into_iter().map(|t| t.symbol).collect();
        if benchmarks_path.exists() {
            tickers.extend(io::read_tickers_file(&benchmarks_path)?.into_iter().map(|t| t.symbol));
        }

        let mut master_db = MasterDb::load(&findb_path)?;
        let legacy_dir = skip_path.parent().map(Path::to_path_buf);
        let mut skip_store = SkipStore::load(&skip_path, legacy_dir.as_deref())?;

        let provider = Arc::new(HttpPriceProvider::new(quote_base_url, history_base_url));
        let today = Utc::now().date_naive();
        let fetch_timestamp = Utc::now().to_rfc3339();

        let (stats, financials) = downloader::run_download(
            provider,
            &tickers,
            history_years,
            concurrency,
            today,
            &special_closures,
            &fetch_timestamp,
            &mut master_db,
            &mut skip_store,
        )
        .await;

        master_db.save()?;
        skip_store.save()?;
        io::write_financials_db(&financials_path, &financials)?;

        progress.update(json!({
            "tickers_processed": stats.tickers_processed,
            "tickers_skipped_all": stats.tickers_skipped_all,
            "tickers_marked_all_this_run": stats.tickers_marked_all_this_run,
            "rows_added": stats.rows_added,
        }))?;

        tracing::info!(?stats, "download stage finished");
        Ok(progress)
    })
    .await
}
