//! Compares the current ledger-derived holdings against the latest ideal
//! portfolio and recommends HOLD or REBALANCE with a concrete set of
//! per-symbol weight-delta transactions.

use chrono::NaiveDate;
use domain::{Decision, LedgerRow, OptimizationError, OptimizationRecommendation, Position, Side, TransactionDelta};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionCostMode {
    Dynamic,
    Fixed,
}

#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    pub weight_expected_return: f64,
    pub weight_sharpe_ratio: f64,
    pub weight_momentum: f64,
    pub min_excess_return_threshold: f64,
    pub transaction_cost_mode: TransactionCostMode,
    pub transaction_cost_min_transactions: usize,
    pub transaction_cost_min_months: i64,
    pub transaction_cost_fixed_pct: f64,
    pub num_candidate_portfolios: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            weight_expected_return: 0.4,
            weight_sharpe_ratio: 0.4,
            weight_momentum: 0.2,
            min_excess_return_threshold: 0.5,
            transaction_cost_mode: TransactionCostMode::Dynamic,
            transaction_cost_min_transactions: 20,
            transaction_cost_min_months: 6,
            transaction_cost_fixed_pct: 0.1,
            num_candidate_portfolios: 100,
        }
    }
}

/// Current holdings, derived from the ledger's net positions.
#[derive(Debug, Clone)]
pub struct HoldingsMetrics {
    pub weights: HashMap<String, f64>,
    pub expected_return_pct: f64,
    pub sharpe_ratio: f64,
    pub current_value: f64,
}

/// Recompute current holdings: value-weighted, expected return via
/// provider target where available, else a caller-supplied fallback
/// return per ticker (e.g. an N-day historical return).
pub fn compute_holdings_metrics(
    positions: &[Position],
    current_prices: &HashMap<String, f64>,
    target_prices: &HashMap<String, f64>,
    fallback_returns: &HashMap<String, f64>,
    holdings_daily_returns: &[f64],
) -> Result<HoldingsMetrics, OptimizationError> {
    if positions.is_empty() {
        return Err(OptimizationError::NoHoldings);
    }

    let mut values = HashMap::new();
    let mut total_value = 0.0;
    for p in positions {
        if p.net_qty <= 0.0 {
            continue;
        }
        let price = current_prices.get(&p.ticker).copied().unwrap_or(p.avg_cost);
        let value = p.net_qty * price;
        values.insert(p.ticker.clone(), value);
        total_value += value;
    }

    if total_value <= 0.0 {
        return Err(OptimizationError::NoHoldings);
    }

    let mut weights = HashMap::new();
    let mut expected_return_pct = 0.0;
    for (ticker, value) in &values {
        let weight = value / total_value;
        weights.insert(ticker.clone(), weight);

        let price = current_prices.get(ticker).copied().unwrap_or(0.0);
        let stock_return_pct = if let (Some(&target), true) = (target_prices.get(ticker), price > 0.0) {
            (target / price - 1.0) * 100.0
        } else {
            fallback_returns.get(ticker).copied().unwrap_or(0.0) * 100.0
        };
        expected_return_pct += weight * stock_return_pct;
    }

    let sharpe_ratio = portfolio_math::sharpe_ratio(holdings_daily_returns, 0.0).unwrap_or(0.0);

    Ok(HoldingsMetrics { weights, expected_return_pct, sharpe_ratio, current_value: total_value })
}

/// The ideal portfolio re-priced against current prices/targets (rather
/// than the stale figures it was persisted with).
#[derive(Debug, Clone)]
pub struct IdealMetrics {
    pub weights: HashMap<String, f64>,
    pub expected_return_pct: f64,
    pub historical_return_pct: f64,
    pub sharpe_ratio: f64,
}

pub fn recompute_ideal_metrics(
    ideal_stocks: &[String],
    ideal_weights: &[f64],
    current_prices: &HashMap<String, f64>,
    target_prices: &HashMap<String, f64>,
    historical_return_pct: f64,
    ideal_sharpe_ratio: f64,
) -> Result<IdealMetrics, OptimizationError> {
    if ideal_stocks.is_empty() {
        return Err(OptimizationError::NoIdealPortfolio);
    }

    let weights: HashMap<String, f64> =
        ideal_stocks.iter().cloned().zip(ideal_weights.iter().copied()).collect();

    let mut expected_return_pct = 0.0;
    for (ticker, weight) in &weights {
        let price = current_prices.get(ticker).copied().unwrap_or(0.0);
        if let (Some(&target), true) = (target_prices.get(ticker), price > 0.0) {
            expected_return_pct += weight * (target / price - 1.0) * 100.0;
        }
    }

    Ok(IdealMetrics { weights, expected_return_pct, historical_return_pct, sharpe_ratio: ideal_sharpe_ratio })
}

/// DYNAMIC cost: average `100*fees/gross` over the larger of the last 20
/// ledger rows or the last 6 months of ledger rows.
pub fn dynamic_transaction_cost_pct(ledger: &[LedgerRow], today: NaiveDate, config: &OptimizerConfig) -> f64 {
    if ledger.is_empty() {
        return config.transaction_cost_fixed_pct;
    }

    let mut sorted: Vec<&LedgerRow> = ledger.iter().collect();
    sorted.sort_by_key(|r| r.trade_date);

    let last_n: Vec<&LedgerRow> = sorted
        .iter()
        .rev()
        .take(config.transaction_cost_min_transactions)
        .copied()
        .collect();

    let cutoff = today - chrono::Duration::days(config.transaction_cost_min_months * 30);
    let last_months: Vec<&LedgerRow> = sorted.iter().filter(|r| r.trade_date >= cutoff).copied().collect();

    let window: &[&LedgerRow] = if last_months.len() > last_n.len() { &last_months } else { &last_n };
    if window.is_empty() {
        return config.transaction_cost_fixed_pct;
    }

    let total_fees: f64 = window.iter().map(|r| r.fees).sum();
    let total_gross: f64 = window.iter().map(|r| r.quantity * r.price).sum();
    if total_gross <= 0.0 {
        return config.transaction_cost_fixed_pct;
    }
    100.0 * total_fees / total_gross
}

fn transaction_cost_pct(ledger: &[LedgerRow], today: NaiveDate, config: &OptimizerConfig) -> f64 {
    match config.transaction_cost_mode {
        TransactionCostMode::Fixed => config.transaction_cost_fixed_pct,
        TransactionCostMode::Dynamic => dynamic_transaction_cost_pct(ledger, today, config),
    }
}

fn normalize_bounded(value: f64, lo: f64, hi: f64) -> f64 {
    if (hi - lo).abs() < 1e-12 {
        return 0.5;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

struct Candidate {
    lambda: f64,
    weights: HashMap<String, f64>,
    net_return_pct: f64,
    sharpe_ratio: f64,
    momentum: f64,
    score: f64,
}

/// Full B/C-stage run: candidate blending, scoring, decision, and
/// transaction-delta emission.
#[allow(clippy::too_many_arguments)]
pub fn optimize(
    holdings: &HoldingsMetrics,
    ideal: &IdealMetrics,
    momentum_12m: &HashMap<String, f64>,
    ledger: &[LedgerRow],
    today: NaiveDate,
    config: &OptimizerConfig,
    run_id: &str,
    timestamp: &str,
) -> OptimizationRecommendation {
    let cost_pct = transaction_cost_pct(ledger, today, config);

    let all_tickers: HashSet<&String> = holdings.weights.keys().chain(ideal.weights.keys()).collect();
    let n = config.num_candidate_portfolios.max(1);

    let mut candidates = Vec::with_capacity(n + 1);

    for i in 0..=n {
        let lambda = i as f64 / n as f64;

        let mut blended: HashMap<String, f64> = HashMap::new();
        for ticker in &all_tickers {
            let w_h = holdings.weights.get(*ticker).copied().unwrap_or(0.0);
            let w_i = ideal.weights.get(*ticker).copied().unwrap_or(0.0);
            let w = (1.0 - lambda) * w_h + lambda * w_i;
            if w >= 0.001 {
                blended.insert((*ticker).clone(), w);
            }
        }
        let total: f64 = blended.values().sum();
        if total > 1e-9 {
            for w in blended.values_mut() {
                *w /= total;
            }
        }

        let exp_ret = (1.0 - lambda) * holdings.expected_return_pct + lambda * ideal.expected_return_pct;
        let sharpe = (1.0 - lambda) * holdings.sharpe_ratio + lambda * ideal.sharpe_ratio;

        let momentum: f64 = blended
            .iter()
            .filter_map(|(t, w)| momentum_12m.get(t).map(|m| m * w))
            .sum();

        let turnover: f64 = all_tickers
            .iter()
            .map(|t| {
                let w_target = blended.get(*t).copied().unwrap_or(0.0);
                let w_current = holdings.weights.get(*t).copied().unwrap_or(0.0);
                (w_target - w_current).abs()
            })
            .sum();
        let transition_cost_pct = turnover * cost_pct;
        let net_return_pct = exp_ret - transition_cost_pct;

        let score = config.weight_expected_return * normalize_bounded(net_return_pct, -20.0, 100.0)
            + config.weight_sharpe_ratio * normalize_bounded(sharpe, -1.0, 3.0)
            + config.weight_momentum * normalize_bounded(momentum, -1.0, 2.0);

        candidates.push(Candidate { lambda, weights: blended, net_return_pct, sharpe_ratio: sharpe, momentum, score });
    }

    // Prefer the smallest lambda among tied scores, so a portfolio that's
    // already optimal resolves to "stay put" (lambda 0) rather than an
    // arbitrary full rebalance with identical economics.
    let optimal = candidates
        .into_iter()
        .fold(None::<Candidate>, |acc, c| match &acc {
            Some(best) if c.score <= best.score => acc,
            _ => Some(c),
        })
        .expect("at least one candidate");

    let excess = optimal.net_return_pct - holdings.expected_return_pct;

    let (decision, reason) = if optimal.lambda < 0.1 {
        (Decision::Hold, "optimal blend is effectively the current holdings".to_string())
    } else if excess >= config.min_excess_return_threshold {
        (Decision::Rebalance, format!("optimal candidate beats holdings by {excess:.2} pts net of transition cost"))
    } else {
        (Decision::Hold, format!("excess return {excess:.2} pts below threshold {:.2}", config.min_excess_return_threshold))
    };

    let turnover_cost_pct = all_tickers
        .iter()
        .map(|t| {
            let w_target = optimal.weights.get(*t).copied().unwrap_or(0.0);
            let w_current = holdings.weights.get(*t).copied().unwrap_or(0.0);
            (w_target - w_current).abs()
        })
        .sum::<f64>()
        * cost_pct;

    let mut transactions = Vec::new();
    for ticker in &all_tickers {
        let w_target = optimal.weights.get(*ticker).copied().unwrap_or(0.0);
        let w_current = holdings.weights.get(*ticker).copied().unwrap_or(0.0);
        let delta = w_target - w_current;
        if delta.abs() < 0.001 {
            continue;
        }
        transactions.push(TransactionDelta {
            ticker: (*ticker).clone(),
            side: if delta > 0.0 { Side::Buy } else { Side::Sell },
            weight_delta: delta,
        });
    }

    OptimizationRecommendation {
        run_id: run_id.to_string(),
        timestamp: timestamp.to_string(),
        decision,
        reason,
        blend_ratio: optimal.lambda,
        holdings_expected_return_pct: holdings.expected_return_pct,
        holdings_sharpe_ratio: holdings.sharpe_ratio,
        optimal_expected_return_pct: optimal.net_return_pct,
        optimal_sharpe_ratio: optimal.sharpe_ratio,
        transition_cost_pct: turnover_cost_pct,
        transactions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holdings_metrics_require_positions() {
        let err = compute_holdings_metrics(&[], &HashMap::new(), &HashMap::new(), &HashMap::new(), &[]).unwrap_err();
        assert!(matches!(err, OptimizationError::NoHoldings));
    }

    #[test]
    fn holdings_metrics_weight_by_value() {
        let positions = vec![
            Position { ticker: "PETR4".to_string(), net_qty: 100.0, avg_cost: 10.0 },
            Position { ticker: "VALE3".to_string(), net_qty: 50.0, avg_cost: 20.0 },
        ];
        let prices: HashMap<String, f64> =
            [("PETR4".to_string(), 12.0), ("VALE3".to_string(), 22.0)].into_iter().collect();
        let metrics = compute_holdings_metrics(&positions, &prices, &HashMap::new(), &HashMap::new(), &[]).unwrap();
        // PETR4 value 1200, VALE3 value 1100, total 2300
        assert!((metrics.weights["PETR4"] - 1200.0 / 2300.0).abs() < 1e-9);
    }

    #[test]
    fn ideal_metrics_reject_empty_portfolio() {
        let err =
            recompute_ideal_metrics(&[], &[], &HashMap::new(), &HashMap::new(), 0.0, 0.0).unwrap_err();
        assert!(matches!(err, OptimizationError::NoIdealPortfolio));
    }

    #[test]
    fn rebalance_recommended_when_excess_return_clears_threshold() {
        let holdings = HoldingsMetrics {
            weights: [("PETR4".to_string(), 1.0)].into_iter().collect(),
            expected_return_pct: 2.0,
            sharpe_ratio: 0.3,
            current_value: 10_000.0,
        };
        let ideal = IdealMetrics {
            weights: [("VALE3".to_string(), 1.0)].into_iter().collect(),
            expected_return_pct: 40.0,
            historical_return_pct: 35.0,
            sharpe_ratio: 1.5,
        };
        let config = OptimizerConfig::default();
        let rec = optimize(
            &holdings,
            &ideal,
            &HashMap::new(),
            &[],
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            &config,
            "run-1",
            "ts",
        );
        assert_eq!(rec.decision, Decision::Rebalance);
        assert!(!rec.transactions.is_empty());
    }

    #[test]
    fn hold_recommended_when_portfolios_are_identical() {
        let holdings = HoldingsMetrics {
            weights: [("PETR4".to_string(), 1.0)].into_iter().collect(),
            expected_return_pct: 10.0,
            sharpe_ratio: 1.0,
            current_value: 10_000.0,
        };
        let ideal = IdealMetrics {
            weights: [("PETR4".to_string(), 1.0)].into_iter().collect(),
            expected_return_pct: 10.0,
            historical_return_pct: 10.0,
            sharpe_ratio: 1.0,
        };
        let config = OptimizerConfig::default();
        let rec = optimize(
            &holdings,
            &ideal,
            &HashMap::new(),
            &[],
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            &config,
            "run-1",
            "ts",
        );
        assert_eq!(rec.decision, Decision::Hold);
    }
}
