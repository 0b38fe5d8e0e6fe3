//! Brings MasterDB up to date through the previous business day,
//! respecting SkipStore and tolerating provider failures per ticker.

mod provider;

pub use provider::{HttpPriceProvider, PriceProvider, TickerMetadata};

use calendar::{business_days, previous_business_day};
use chrono::{Datelike, Duration, NaiveDate};
use domain::{Financials, MasterDbRow, PriceBar, ProviderError};
use master_db::MasterDb;
use skip_store::SkipStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Per-ticker download outcome, used for logging and final summary.
#[derive(Debug, Default)]
pub struct DownloadStats {
    pub tickers_processed: u64,
    pub tickers_skipped_all: u64,
    pub tickers_marked_all_this_run: u64,
    pub rows_added: u64,
}

/// Run the downloader for `tickers`, writing results into `master_db` and
/// `skip_store`. Neither store is persisted by this function — the caller
/// decides when to `save()`, matching the "accumulate in memory, merge
/// once" direct-update mode. `special_closures` is the parsed
/// `SPECIAL_MARKET_CLOSURES` map, honored by every business-day computation
/// below. Returns the per-ticker fundamentals snapshot alongside the run
/// stats, for the caller to merge into `FINANCIALS_DB_FILE`.
pub async fn run_download(
    provider: Arc<dyn PriceProvider>,
    tickers: &[String],
    history_years: i64,
    concurrency: usize,
    today: NaiveDate,
    special_closures: &HashMap<NaiveDate, String>,
    fetch_timestamp: &str,
    master_db: &mut MasterDb,
    skip_store: &mut SkipStore,
) -> (DownloadStats, Vec<Financials>) {
    let cutoff = previous_business_day(today, special_closures);
    let start = NaiveDate::from_ymd_opt(cutoff.year() - history_years as i32, cutoff.month(), cutoff.day())
        .unwrap_or(cutoff - Duration::days(history_years * 365));

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let processed = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::with_capacity(tickers.len());

    for ticker in tickers {
        if skip_store.is_skipped_all(ticker) {
            continue;
        }

        let existing_dates: std::collections::HashSet<NaiveDate> =
            master_db.existing_dates(ticker).into_iter().collect();
        let already_skipped: std::collections::HashSet<String> =
            skip_store.get(ticker).into_iter().collect();

        let wanted = business_days(start, cutoff, special_closures);
        let missing: Vec<NaiveDate> = wanted
            .into_iter()
            .filter(|d| !existing_dates.contains(d) && !already_skipped.contains(&d.format("%Y-%m-%d").to_string()))
            .collect();

        let ticker = ticker.clone();
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);
        let processed = Arc::clone(&processed);
        let total = tickers.len();

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let outcome = fetch_ticker(&*provider, &ticker, &missing).await;
            let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(ticker = %ticker, progress = format!("{done}/{total}"), "download step complete");
            outcome
        });
        handles.push(handle);
    }

    let mut stats = DownloadStats::default();
    let mut all_new_rows = Vec::new();
    let mut financials = Vec::new();

    for handle in handles {
        match handle.await {
            Ok(TickerOutcome::Delisted(ticker)) => {
                skip_store.mark_all(&ticker);
                stats.tickers_marked_all_this_run += 1;
            }
            Ok(TickerOutcome::Fetched { ticker, bars, failed_dates, metadata }) => {
                if !failed_dates.is_empty() {
                    skip_store.add_dates(&ticker, failed_dates.iter().map(|d| d.format("%Y-%m-%d").to_string()));
                }
                if bars.is_empty() && !failed_dates.is_empty() {
                    // every requested date failed and no metadata recovered it
                    skip_store.mark_all(&ticker);
                    stats.tickers_marked_all_this_run += 1;
                } else {
                    stats.rows_added += bars.len() as u64;
                    for bar in bars {
                        all_new_rows.push(MasterDbRow {
                            ticker: ticker.clone(),
                            date: bar.date,
                            open: bar.open,
                            high: bar.high,
                            low: bar.low,
                            close: bar.close,
                            volume: bar.volume,
                        });
                    }
                }
                financials.push(Financials {
                    ticker,
                    current_price: metadata.current_price,
                    target_price: metadata.target_mean_price,
                    forward_pe: metadata.forward_pe,
                    forward_eps: metadata.forward_eps,
                    dividend_yield: metadata.dividend_yield,
                    average_volume: metadata.average_volume,
                    last_updated: fetch_timestamp.to_string(),
                });
            }
            Ok(TickerOutcome::NetworkFailure(ticker, message)) => {
                tracing::warn!(ticker = %ticker, error = %message, "provider error, skipping this run");
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "download task panicked");
            }
        }
        stats.tickers_processed += 1;
    }

    master_db.merge(all_new_rows);
    (stats, financials)
}

enum TickerOutcome {
    Delisted(String),
    Fetched {
        ticker: String,
        bars: Vec<PriceBar>,
        failed_dates: Vec<NaiveDate>,
        metadata: TickerMetadata,
    },
    NetworkFailure(String, String),
}

/// Fetch metadata first (tradability plus fundamentals), then history only
/// for whatever dates are still missing — mirrors the per-ticker step order
/// in the external interface (metadata before the missing-dates check).
async fn fetch_ticker(provider: &dyn PriceProvider, ticker: &str, missing: &[NaiveDate]) -> TickerOutcome {
    let metadata = match provider.fetch_metadata(ticker).await {
        Ok(meta) if !meta.is_tradable => return TickerOutcome::Delisted(ticker.to_string()),
        Ok(meta) => meta,
        Err(ProviderError::InvalidTicker(_)) => return TickerOutcome::Delisted(ticker.to_string()),
        Err(err) => return TickerOutcome::NetworkFailure(ticker.to_string(), err.to_string()),
    };

    if missing.is_empty() {
        return TickerOutcome::Fetched {
            ticker: ticker.to_string(),
            bars: Vec::new(),
            failed_dates: Vec::new(),
            metadata,
        };
    }

    let range_start = *missing.iter().min().expect("non-empty");
    let range_end = *missing.iter().max().expect("non-empty") + Duration::days(1);

    match provider.fetch_history(ticker, range_start, range_end).await {
        Ok(bars) => {
            let returned_dates: std::collections::HashSet<NaiveDate> = bars.iter().map(|b| b.date).collect();
            let failed_dates: Vec<NaiveDate> = missing
                .iter()
                .copied()
                .filter(|d| !returned_dates.contains(d))
                .collect();
            TickerOutcome::Fetched {
                ticker: ticker.to_string(),
                bars,
                failed_dates,
                metadata,
            }
        }
        Err(err) => TickerOutcome::NetworkFailure(ticker.to_string(), err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixtureProvider {
        bars: Mutex<HashMap<String, Vec<PriceBar>>>,
    }

    #[async_trait]
    impl PriceProvider for FixtureProvider {
        async fn fetch_metadata(&self, ticker: &str) -> Result<TickerMetadata, ProviderError> {
            if ticker == "DEAD4" {
                return Ok(TickerMetadata { is_tradable: false, ..Default::default() });
            }
            Ok(TickerMetadata { is_tradable: true, ..Default::default() })
        }

        async fn fetch_history(
            &self,
            ticker: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<PriceBar>, ProviderError> {
            Ok(self.bars.lock().unwrap().get(ticker).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn delisted_ticker_is_marked_all() {
        let provider: Arc<dyn PriceProvider> = Arc::new(FixtureProvider { bars: Mutex::new(HashMap::new()) });
        let mut master_db = MasterDb::load(std::env::temp_dir().join("nonexistent_test_db.csv")).unwrap();
        let mut skip_store = SkipStore::load(std::env::temp_dir().join("nonexistent_skip.json"), None).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();

        run_download(
            provider,
            &["DEAD4".to_string()],
            1,
            2,
            today,
            &HashMap::new(),
            "2026-01-05T00:00:00Z",
            &mut master_db,
            &mut skip_store,
        )
        .await;

        assert!(skip_store.is_skipped_all("DEAD4"));
    }

    #[tokio::test]
    async fn bars_are_merged_into_master_db() {
        let mut bars = HashMap::new();
        bars.insert(
            "PETR4".to_string(),
            vec![PriceBar {
                date: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
                open: 10.0,
                high: 10.5,
                low: 9.5,
                close: 10.2,
                volume: 1000.0,
            }],
        );
        let provider: Arc<dyn PriceProvider> = Arc::new(FixtureProvider { bars: Mutex::new(bars) });
        let mut master_db = MasterDb::load(std::env::temp_dir().join("nonexistent_test_db2.csv")).unwrap();
        let mut skip_store = SkipStore::load(std::env::temp_dir().join("nonexistent_skip2.json"), None).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();

        let (_stats, financials) = run_download(
            provider,
            &["PETR4".to_string()],
            1,
            2,
            today,
            &HashMap::new(),
            "2026-01-05T00:00:00Z",
            &mut master_db,
            &mut skip_store,
        )
        .await;

        assert!(!master_db.is_empty());
        assert_eq!(financials.len(), 1);
    }
}
