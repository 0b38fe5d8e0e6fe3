//! Scores a ticker universe on risk-adjusted return, valuation upside, and
//! momentum, blends them into a composite score, and persists the ranked
//! result plus per-sector P/E medians and a Top-20 correlation matrix.

use chrono::NaiveDate;
use domain::{Financials, ScoringError, SectorPe, ScoredStock, TargetSource, Ticker};
use master_db::MasterDb;
use std::collections::HashMap;

const UPSIDE_MIN: f64 = -0.99;
const UPSIDE_MAX: f64 = 10.0;
const TOP_N_CORRELATION: usize = 20;

/// Per-metric weights applied to the normalized Sharpe/upside/momentum
/// columns. Callers resolve these from config and regime blending before
/// invoking [`score_universe`] — this crate only computes the composite
/// once weights are final.
#[derive(Debug, Clone, Copy)]
pub struct MetricWeights {
    pub sharpe: f64,
    pub upside: f64,
    pub momentum: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            sharpe: 0.40,
            upside: 0.35,
            momentum: 0.25,
        }
    }
}

/// Variance-weighted alternative to static [`MetricWeights`]: `w_x =
/// var(x) / sum(var)`, falling back to the static defaults if all three
/// columns are degenerate (zero variance).
pub fn dynamic_weights(sharpe: &[f64], upside: &[f64], momentum: &[f64]) -> MetricWeights {
    let var = |xs: &[f64]| -> f64 {
        if xs.len() < 2 {
            return 0.0;
        }
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() as f64 - 1.0)
    };
    let (vs, vu, vm) = (var(sharpe), var(upside), var(momentum));
    let total = vs + vu + vm;
    if total < 1e-12 {
        return MetricWeights::default();
    }
    MetricWeights {
        sharpe: vs / total,
        upside: vu / total,
        momentum: vm / total,
    }
}

pub struct ScorerConfig {
    pub risk_free_rate: f64,
    pub momentum_window_days: usize,
    pub weights: MetricWeights,
    /// Risk profile key this run's weights were blended for (e.g.
    /// `"moderado"`), recorded on every row for later auditing.
    pub risk_profile_used: String,
    /// Market regime label detected for this run (or a static fallback
    /// when regime auto-detection is off), recorded on every row.
    pub market_regime: String,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
            momentum_window_days: 126,
            weights: MetricWeights::default(),
            risk_profile_used: "moderado".to_string(),
            market_regime: "neutral".to_string(),
        }
    }
}

pub struct ScorerOutput {
    pub scored: Vec<ScoredStock>,
    pub sector_pe: Vec<SectorPe>,
    /// Tickers (Top-20 by composite score) in the order used to build
    /// `correlation_matrix`.
    pub correlation_tickers: Vec<String>,
    pub correlation_matrix: Vec<Vec<f64>>,
}

struct RawMetrics {
    ticker: String,
    sector: String,
    industry: String,
    sharpe: f64,
    annualized_mean_return: f64,
    annualized_std_dev: f64,
    current_price: f64,
    target_price: f64,
    forward_pe: f64,
    forward_eps: f64,
    sector_median_pe: f64,
    upside: f64,
    momentum: f64,
    target_source: TargetSource,
    daily_returns: Vec<f64>,
}

/// Score `tickers` against `master_db` and `financials`, blending metrics
/// with `weights` (already resolved for this run's risk profile/regime).
pub fn score_universe(
    tickers: &[Ticker],
    master_db: &MasterDb,
    financials: &HashMap<String, Financials>,
    config: &ScorerConfig,
    run_id: &str,
    timestamp: &str,
) -> Result<ScorerOutput, ScoringError> {
    if tickers.is_empty() {
        return Err(ScoringError::ValidationError("ticker universe is empty".to_string()));
    }

    let sector_median_pe_by_sector = compute_sector_median_pe(tickers, financials);

    let mut raw: Vec<RawMetrics> = Vec::with_capacity(tickers.len());
    for t in tickers {
        let rows = master_db.rows_for(&t.symbol);
        if rows.len() < 2 {
            continue;
        }
        let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();
        let daily_returns = portfolio_math::daily_returns(&closes);

        let sharpe = portfolio_math::sharpe_ratio(&daily_returns, config.risk_free_rate).unwrap_or(0.0);
        let momentum = portfolio_math::momentum(&closes, config.momentum_window_days).unwrap_or(0.0);
        let (annualized_mean_return, annualized_std_dev) = portfolio_math::annualized_mean_std(&daily_returns);

        let fin = financials.get(&t.symbol);
        let current_price = fin.and_then(|f| f.current_price).unwrap_or(*closes.last().unwrap());
        let forward_pe = fin.and_then(|f| f.forward_pe).unwrap_or(0.0);
        let forward_eps = fin.and_then(|f| f.forward_eps).unwrap_or(0.0);
        let sector_median_pe = sector_median_pe_by_sector.get(&t.sector).copied().unwrap_or(0.0);

        let (upside, target_price, target_source) = resolve_upside(
            fin,
            current_price,
            forward_pe,
            sector_median_pe_by_sector.get(&t.sector).copied(),
        );

        raw.push(RawMetrics {
            ticker: t.symbol.clone(),
            sector: t.sector.clone(),
            industry: t.industry.clone(),
            sharpe,
            annualized_mean_return,
            annualized_std_dev,
            current_price,
            target_price,
            forward_pe,
            forward_eps,
            sector_median_pe,
            upside,
            momentum,
            target_source,
            daily_returns,
        });
    }

    if raw.is_empty() {
        return Err(ScoringError::ValidationError(
            "no ticker had enough price history to score".to_string(),
        ));
    }

    let sharpe_vals: Vec<f64> = raw.iter().map(|r| r.sharpe).collect();
    let upside_vals: Vec<f64> = raw.iter().map(|r| r.upside).collect();
    let momentum_vals: Vec<f64> = raw.iter().map(|r| r.momentum).collect();

    let sharpe_norm = portfolio_math::min_max_normalize(&sharpe_vals);
    let upside_norm = portfolio_math::min_max_normalize(&upside_vals);
    let momentum_norm = portfolio_math::min_max_normalize(&momentum_vals);

    let mut scored: Vec<ScoredStock> = raw
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let composite = config.weights.sharpe * sharpe_norm[i]
                + config.weights.upside * upside_norm[i]
                + config.weights.momentum * momentum_norm[i];
            ScoredStock {
                run_id: run_id.to_string(),
                timestamp: timestamp.to_string(),
                ticker: r.ticker.clone(),
                sector: r.sector.clone(),
                industry: r.industry.clone(),
                composite_score: composite,
                sharpe_ratio: r.sharpe,
                sharpe_norm: sharpe_norm[i],
                annualized_mean_return: r.annualized_mean_return,
                annualized_std_dev: r.annualized_std_dev,
                potential_upside: r.upside,
                upside_norm: upside_norm[i],
                momentum: r.momentum,
                momentum_norm: momentum_norm[i],
                current_price: r.current_price,
                target_price: r.target_price,
                forward_pe: r.forward_pe,
                forward_eps: r.forward_eps,
                sector_median_pe: r.sector_median_pe,
                target_source: r.target_source,
                weight_sharpe: config.weights.sharpe,
                weight_upside: config.weights.upside,
                weight_momentum: config.weights.momentum,
                risk_profile_used: config.risk_profile_used.clone(),
                market_regime: config.market_regime.clone(),
            }
        })
        .collect();

    scored.sort_by(|a, b| b.composite_score.partial_cmp(&a.composite_score).unwrap_or(std::cmp::Ordering::Equal));

    let scored: Vec<ScoredStock> = scored
        .into_iter()
        .filter(|s| {
            s.potential_upside > 0.0
                && s.current_price > 0.0
                && s.target_price > 0.0
                && s.forward_pe > 0.0
        })
        .collect();

    let sector_pe = sector_median_pe_by_sector
        .into_iter()
        .map(|(sector, median)| {
            let sample_count = financials
                .values()
                .filter(|f| f.forward_pe.map(|pe| pe > 0.0).unwrap_or(false))
                .count();
            SectorPe {
                run_id: run_id.to_string(),
                sector,
                median_forward_pe: median,
                sample_count,
            }
        })
        .collect();

    let top_tickers: Vec<String> = scored.iter().take(TOP_N_CORRELATION).map(|s| s.ticker.clone()).collect();
    let returns_by_ticker: HashMap<String, Vec<f64>> = raw
        .into_iter()
        .filter(|r| top_tickers.contains(&r.ticker))
        .map(|r| (r.ticker, r.daily_returns))
        .collect();
    let correlation_matrix = portfolio_math::correlation_matrix(&top_tickers, &returns_by_ticker);

    Ok(ScorerOutput {
        scored,
        sector_pe,
        correlation_tickers: top_tickers,
        correlation_matrix,
    })
}

fn compute_sector_median_pe(tickers: &[Ticker], financials: &HashMap<String, Financials>) -> HashMap<String, f64> {
    let mut by_sector: HashMap<String, Vec<f64>> = HashMap::new();
    for t in tickers {
        if let Some(pe) = financials.get(&t.symbol).and_then(|f| f.forward_pe) {
            if pe > 0.0 {
                by_sector.entry(t.sector.clone()).or_default().push(pe);
            }
        }
    }
    by_sector
        .into_iter()
        .filter_map(|(sector, mut pes)| {
            if pes.is_empty() {
                return None;
            }
            pes.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mid = pes.len() / 2;
            let median = if pes.len() % 2 == 0 {
                (pes[mid - 1] + pes[mid]) / 2.0
            } else {
                pes[mid]
            };
            Some((sector, median))
        })
        .collect()
}

fn resolve_upside(
    fin: Option<&Financials>,
    current_price: f64,
    forward_pe: f64,
    sector_median_pe: Option<f64>,
) -> (f64, f64, TargetSource) {
    if let Some(f) = fin {
        if let (Some(target), true) = (f.target_price, current_price > 0.0) {
            let upside = target / current_price - 1.0;
            return (clamp_upside(upside), target, TargetSource::ProviderTarget);
        }
    }

    if let Some(median) = sector_median_pe {
        if forward_pe > 0.0 {
            let upside = median / forward_pe - 1.0;
            let target_price = current_price * (1.0 + upside);
            return (clamp_upside(upside), target_price, TargetSource::SectorPeFallback);
        }
    }

    (0.0, 0.0, TargetSource::SectorPeFallback)
}

fn clamp_upside(upside: f64) -> f64 {
    if upside.is_nan() {
        return 0.0;
    }
    upside.clamp(UPSIDE_MIN, UPSIDE_MAX)
}

/// Cross-universe mean daily return series, used by the regime detector's
/// volatility-percentile computation (grounded in `A2_Scoring.py`, which
/// computes regime off the universe mean rather than the benchmark alone).
pub fn cross_universe_mean_returns(master_db: &MasterDb, tickers: &[Ticker]) -> Vec<f64> {
    let mut by_date: HashMap<NaiveDate, Vec<f64>> = HashMap::new();
    for t in tickers {
        let rows = master_db.rows_for(&t.symbol);
        for window in rows.windows(2) {
            if window[0].close != 0.0 {
                let ret = (window[1].close - window[0].close) / window[0].close;
                by_date.entry(window[1].date).or_default().push(ret);
            }
        }
    }
    let mut dates: Vec<&NaiveDate> = by_date.keys().collect();
    dates.sort();
    dates
        .into_iter()
        .map(|d| {
            let rets = &by_date[d];
            rets.iter().sum::<f64>() / rets.len() as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use master_db::MasterDb;

    fn bar(ticker: &str, date: &str, close: f64) -> domain::MasterDbRow {
        domain::MasterDbRow {
            ticker: ticker.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        }
    }

    fn sample_db() -> MasterDb {
        let mut db = MasterDb::load(std::env::temp_dir().join("scorer_test_nonexistent.csv")).unwrap();
        let mut rows = Vec::new();
        let mut price = 10.0;
        for day in 1..=30 {
            price *= 1.01;
            rows.push(bar("PETR4", &format!("2024-01-{day:02}"), price));
        }
        let mut price2 = 20.0;
        for day in 1..=30 {
            price2 *= 0.995;
            rows.push(bar("VALE3", &format!("2024-01-{day:02}"), price2));
        }
        db.merge(rows);
        db
    }

    #[test]
    fn scores_universe_and_filters_non_positive_upside() {
        let db = sample_db();
        let tickers = vec![
            Ticker { symbol: "PETR4".to_string(), sector: "Energy".to_string(), industry: "Oil".to_string() },
            Ticker { symbol: "VALE3".to_string(), sector: "Materials".to_string(), industry: "Mining".to_string() },
        ];
        let mut financials = HashMap::new();
        financials.insert(
            "PETR4".to_string(),
            Financials {
                ticker: "PETR4".to_string(),
                current_price: Some(15.0),
                target_price: Some(20.0),
                forward_pe: Some(8.0),
                dividend_yield: Some(0.05),
                ..Default::default()
            },
        );
        financials.insert(
            "VALE3".to_string(),
            Financials {
                ticker: "VALE3".to_string(),
                current_price: Some(15.0),
                target_price: Some(10.0),
                forward_pe: Some(6.0),
                dividend_yield: Some(0.03),
                ..Default::default()
            },
        );

        let config = ScorerConfig::default();
        let output = score_universe(&tickers, &db, &financials, &config, "run-1", "2024-02-01T00:00:00Z").unwrap();
        assert!(output.scored.iter().all(|s| s.potential_upside > 0.0));
        assert!(output.scored.iter().any(|s| s.ticker == "PETR4"));
    }

    #[test]
    fn empty_universe_is_rejected() {
        let db = sample_db();
        let config = ScorerConfig::default();
        let err = score_universe(&[], &db, &HashMap::new(), &config, "run-1", "ts").unwrap_err();
        assert!(matches!(err, ScoringError::ValidationError(_)));
    }

    #[test]
    fn dynamic_weights_sum_to_one() {
        let w = dynamic_weights(&[1.0, 2.0, 3.0], &[0.1, 0.2, 0.3], &[5.0, 5.0, 5.1]);
        assert!((w.sharpe + w.upside + w.momentum - 1.0).abs() < 1e-9);
    }
}
