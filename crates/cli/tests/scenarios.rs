//! End-to-end scenario tests exercising each crate's public API against
//! small synthetic fixtures, no real filesystem beyond `tempfile` for the
//! atomic-write round-trip checks. Each test corresponds to one of the
//! pipeline's concrete walk-throughs: incremental download, a delisted
//! ticker, the scorer's upside/valuation filter, the engine's exact and
//! heuristic k-sweeps, and the optimizer's HOLD boundary.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use domain::{Financials, PriceBar, ProviderError, Ticker};
use downloader::{run_download, PriceProvider, TickerMetadata};
use master_db::MasterDb;
use skip_store::SkipStore;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;

/// A provider that serves canned history for a fixed set of tickers and
/// reports everything else as delisted.
struct FixtureProvider {
    tradable: Vec<String>,
    bars_by_ticker: HashMap<String, Vec<PriceBar>>,
}

#[async_trait]
impl PriceProvider for FixtureProvider {
    async fn fetch_metadata(&self, ticker: &str) -> Result<TickerMetadata, ProviderError> {
        if self.tradable.contains(&ticker.to_string()) {
            Ok(TickerMetadata { is_tradable: true, ..Default::default() })
        } else {
            Err(ProviderError::InvalidTicker(ticker.to_string()))
        }
    }

    async fn fetch_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceBar>, ProviderError> {
        let bars = self
            .bars_by_ticker
            .get(ticker)
            .map(|bars| bars.iter().filter(|b| b.date >= start && b.date < end).cloned().collect())
            .unwrap_or_default();
        Ok(bars)
    }
}

fn bar(date: &str, close: f64) -> PriceBar {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
    PriceBar { date, open: close, high: close, low: close, close, volume: 1_000.0 }
}

/// Scenario: MasterDB has PETR4.SA through 2024-12-20; today is
/// 2024-12-27 (a Friday); 2024-12-24/25 are holidays; the only two
/// missing business days are 2024-12-23 and 2024-12-26. After the run,
/// MasterDB carries both new rows and SkipStore has no entry for the
/// ticker.
#[tokio::test]
async fn incremental_download_fetches_only_missing_business_days() {
    let dir = tempdir().unwrap();
    let mut master_db = MasterDb::load(dir.path().join("master_db.csv")).unwrap();
    let mut skip_store = SkipStore::load(dir.path().join("skipped_tickers.json"), None).unwrap();

    let today = NaiveDate::parse_from_str("2024-12-27", "%Y-%m-%d").unwrap();
    let history_years = 1i64;
    let special = HashMap::new();
    let cutoff = calendar::previous_business_day(today, &special);
    assert_eq!(cutoff, NaiveDate::parse_from_str("2024-12-26", "%Y-%m-%d").unwrap());
    let start = NaiveDate::from_ymd_opt(cutoff.year() - history_years as i32, cutoff.month(), cutoff.day()).unwrap();

    let day23 = NaiveDate::parse_from_str("2024-12-23", "%Y-%m-%d").unwrap();
    let day26 = NaiveDate::parse_from_str("2024-12-26", "%Y-%m-%d").unwrap();

    // Pre-populate every business day in the lookback window except the
    // two that are supposed to come back missing.
    let existing: Vec<domain::MasterDbRow> = calendar::business_days(start, cutoff, &special)
        .into_iter()
        .filter(|d| *d != day23 && *d != day26)
        .map(|d| domain::MasterDbRow { ticker: "PETR4.SA".to_string(), date: d, open: 35.0, high: 35.5, low: 34.5, close: 35.2, volume: 500_000.0 })
        .collect();
    master_db.merge(existing);

    let provider = Arc::new(FixtureProvider {
        tradable: vec!["PETR4.SA".to_string()],
        bars_by_ticker: HashMap::from([("PETR4.SA".to_string(), vec![bar("2024-12-23", 35.4), bar("2024-12-26", 35.6)])]),
    });

    let (stats, _financials) = run_download(
        provider,
        &["PETR4.SA".to_string()],
        history_years,
        4,
        today,
        &special,
        "2024-12-27T00:00:00Z",
        &mut master_db,
        &mut skip_store,
    )
    .await;

    assert_eq!(stats.rows_added, 2);
    let dates: Vec<NaiveDate> = master_db.existing_dates("PETR4.SA");
    assert!(dates.contains(&day23));
    assert!(dates.contains(&day26));
    assert!(skip_store.get("PETR4.SA").is_empty());
}

/// Scenario: INVALID.SA's metadata lookup reports it as delisted/invalid.
/// The run marks SkipStore["INVALID.SA"] == ["ALL"] and issues no history
/// fetch for it; a follow-up run skips it entirely (no provider call).
#[tokio::test]
async fn delisted_ticker_is_marked_skip_all() {
    let dir = tempdir().unwrap();
    let mut master_db = MasterDb::load(dir.path().join("master_db.csv")).unwrap();
    let mut skip_store = SkipStore::load(dir.path().join("skipped_tickers.json"), None).unwrap();

    let provider = Arc::new(FixtureProvider { tradable: vec![], bars_by_ticker: HashMap::new() });
    let today = NaiveDate::parse_from_str("2024-12-27", "%Y-%m-%d").unwrap();

    let empty_closures = HashMap::new();
    let (stats, _financials) = run_download(
        provider.clone(),
        &["INVALID.SA".to_string()],
        1,
        4,
        today,
        &empty_closures,
        "2024-12-27T00:00:00Z",
        &mut master_db,
        &mut skip_store,
    )
    .await;
    assert_eq!(stats.tickers_marked_all_this_run, 1);
    assert!(skip_store.is_skipped_all("INVALID.SA"));
    assert!(master_db.is_empty());

    // A second run should skip the ticker before ever calling the provider.
    let (second, _financials) = run_download(
        provider,
        &["INVALID.SA".to_string()],
        1,
        4,
        today,
        &empty_closures,
        "2024-12-27T00:00:00Z",
        &mut master_db,
        &mut skip_store,
    )
    .await;
    assert_eq!(second.tickers_processed, 0);
}

/// Scenario: a 3-stock universe where A has upside, B has negative
/// upside, and C has a non-positive forward P/E. Only A survives the
/// scorer's post-ranking filter.
#[test]
fn scorer_filters_out_non_positive_upside_and_pe() {
    let dir = tempdir().unwrap();
    let mut master_db = MasterDb::load(dir.path().join("master_db.csv")).unwrap();
    let mut rows = Vec::new();
    for (ticker, base) in [("A", 20.0), ("B", 20.0), ("C", 20.0)] {
        let mut price = base;
        for day in 1..=30 {
            price *= 1.002;
            rows.push(domain::MasterDbRow {
                ticker: ticker.to_string(),
                date: NaiveDate::parse_from_str(&format!("2024-01-{day:02}"), "%Y-%m-%d").unwrap(),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 1_000.0,
            });
        }
    }
    master_db.merge(rows);

    let tickers = vec![
        Ticker { symbol: "A".to_string(), sector: "Energy".to_string(), industry: "Oil".to_string() },
        Ticker { symbol: "B".to_string(), sector: "Energy".to_string(), industry: "Oil".to_string() },
        Ticker { symbol: "C".to_string(), sector: "Energy".to_string(), industry: "Oil".to_string() },
    ];

    let mut financials = HashMap::new();
    financials.insert(
        "A".to_string(),
        Financials { ticker: "A".to_string(), current_price: Some(20.0), target_price: Some(26.0), forward_pe: Some(10.0), dividend_yield: None, ..Default::default() },
    );
    financials.insert(
        "B".to_string(),
        Financials { ticker: "B".to_string(), current_price: Some(20.0), target_price: Some(19.0), forward_pe: Some(10.0), dividend_yield: None, ..Default::default() },
    );
    financials.insert(
        "C".to_string(),
        Financials { ticker: "C".to_string(), current_price: Some(20.0), target_price: Some(25.0), forward_pe: Some(0.0), dividend_yield: None, ..Default::default() },
    );

    let config = scorer::ScorerConfig::default();
    let output = scorer::score_universe(&tickers, &master_db, &financials, &config, "run-scorer", "2024-02-01T00:00:00Z").unwrap();

    let surviving: Vec<&str> = output.scored.iter().map(|s| s.ticker.as_str()).collect();
    assert_eq!(surviving, vec!["A"]);
}

fn synthetic_returns(n_assets: usize, n_days: usize, seed_offset: usize) -> Vec<Vec<f64>> {
    (0..n_assets)
        .map(|a| {
            (0..n_days)
                .map(|d| (((a + seed_offset) * 7 + d * 3) % 11) as f64 / 100.0 - 0.05)
                .collect()
        })
        .collect()
}

/// Scenario: a 5-stock universe, one ticker per sector, `max_stocks_per_sector
/// = 1`, `min_stocks = max_stocks = 3`. Brute force enumerates exactly
/// C(5,3) = 10 subsets; the emitted portfolio holds exactly 3 stocks whose
/// weights sum to 1.
#[test]
fn engine_brute_force_evaluates_exact_k3_combination_count() {
    let tickers: Vec<String> = ["A", "B", "C", "D", "E"].iter().map(|s| s.to_string()).collect();
    let sectors: HashMap<String, String> = tickers.iter().cloned().zip(tickers.iter().cloned()).collect();
    let returns = synthetic_returns(5, 80, 0);

    let combos: Vec<Vec<usize>> = portfolio_engine::combinations::Combinations::new(5, 3).collect();
    assert_eq!(combos.len(), 10);

    let input = portfolio_engine::EngineInput {
        tickers: &tickers,
        sectors: &sectors,
        returns_matrix: &returns,
        k_min: 3,
        k_max: 3,
        heuristic_threshold_k: 9,
        max_stocks_per_sector: Some(1),
    };
    let sim_config = portfolio_engine::SimulationConfig { sim_runs: 200, adaptive_sim_enabled: false, ..Default::default() };
    let ga_config = portfolio_engine::GaConfig::default();

    let outcome = portfolio_engine::run_portfolio_search(&input, &sim_config, &ga_config, 42).unwrap();
    assert_eq!(outcome.stocks.len(), 3);
    assert!((outcome.weights.iter().sum::<f64>() - 1.0).abs() < 1e-6);
}

/// Scenario: a 60-stock universe with K* = 9 and `min_stocks = max_stocks
/// = 12`, above the heuristic threshold. The GA runs; its per-generation
/// best-so-far history is monotone non-decreasing and the run stops at
/// either the generation cap or convergence.
#[test]
fn engine_ga_generation_history_is_monotone_non_decreasing() {
    let universe_size = 60;
    let returns = synthetic_returns(universe_size, 90, 3);
    let ga_config = portfolio_engine::GaConfig { population_size: 50, num_generations: 30, convergence_generations: 10, convergence_tolerance: 1e-4, ..Default::default() };
    let sim_config = portfolio_engine::SimulationConfig { sim_runs: 100, adaptive_sim_enabled: false, ..Default::default() };

    let outcome = portfolio_engine::ga::run_ga(universe_size, 12, &returns, &ga_config, &sim_config, &|_| true, 99).unwrap();

    assert_eq!(outcome.best_combo.len(), 12);
    assert!(outcome.generation_history.windows(2).all(|w| w[1] >= w[0] - 1e-12));
    assert!(outcome.generation_history.len() <= ga_config.num_generations + 1);
}

/// Scenario: current holdings already equal the ideal portfolio (same
/// stocks, same weights). The optimizer recommends HOLD with zero excess
/// return, no transactions, and a blend ratio of 0.0 (stay at current
/// holdings rather than an economically-identical "full rebalance").
#[test]
fn optimizer_recommends_hold_when_holdings_match_ideal() {
    let holdings = optimizer::HoldingsMetrics {
        weights: [("PETR4.SA".to_string(), 0.6), ("VALE3.SA".to_string(), 0.4)].into_iter().collect(),
        expected_return_pct: 12.0,
        sharpe_ratio: 0.8,
        current_value: 10_000.0,
    };
    let ideal = optimizer::IdealMetrics {
        weights: [("PETR4.SA".to_string(), 0.6), ("VALE3.SA".to_string(), 0.4)].into_iter().collect(),
        expected_return_pct: 12.0,
        historical_return_pct: 12.0,
        sharpe_ratio: 0.8,
    };
    let config = optimizer::OptimizerConfig::default();
    let today = NaiveDate::parse_from_str("2026-01-01", "%Y-%m-%d").unwrap();

    let recommendation = optimizer::optimize(&holdings, &ideal, &HashMap::new(), &[], today, &config, "run-opt", "2026-01-01T00:00:00Z");

    assert_eq!(recommendation.decision, domain::Decision::Hold);
    assert!(recommendation.transactions.is_empty());
    assert!((recommendation.blend_ratio - 0.0).abs() < 1e-9);
    assert!((recommendation.optimal_expected_return_pct - recommendation.holdings_expected_return_pct).abs() < 1e-9);
}
