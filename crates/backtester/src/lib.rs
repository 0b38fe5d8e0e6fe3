//! Backtests the latest ideal portfolio against a benchmark: aligns closes
//! on a common date index, builds a normalized equity curve, and computes
//! the standard performance metrics for both sides.

use chrono::NaiveDate;
use domain::PortfolioResult;
use portfolio_math::TRADING_DAYS_PER_YEAR;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BacktestMetrics {
    pub total_return_pct: f64,
    pub cagr_pct: f64,
    pub annualized_vol_pct: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BacktestResult {
    pub run_id: String,
    pub portfolio: BacktestMetrics,
    pub benchmark: BacktestMetrics,
    pub dates: Vec<NaiveDate>,
    pub equity_curve_portfolio: Vec<f64>,
    pub equity_curve_benchmark: Vec<f64>,
}

/// Calendar-day span between `dates`' first and last entries, divided by
/// 365.25 — matching `calculate_backtest_metrics` exactly (not a trading-
/// day count).
fn years_elapsed(dates: &[NaiveDate]) -> f64 {
    if dates.len() < 2 {
        return 0.0;
    }
    let span_days = (*dates.last().unwrap() - *dates.first().unwrap()).num_days();
    span_days as f64 / 365.25
}

fn calculate_backtest_metrics(dates: &[NaiveDate], curve: &[f64]) -> BacktestMetrics {
    if curve.len() < 2 || curve[0] == 0.0 {
        return BacktestMetrics { total_return_pct: 0.0, cagr_pct: 0.0, annualized_vol_pct: 0.0, sharpe_ratio: 0.0, max_drawdown_pct: 0.0 };
    }

    let total_return = curve.last().unwrap() / curve[0] - 1.0;

    let years = years_elapsed(dates);
    let cagr = if years > 0.0 { (1.0 + total_return).powf(1.0 / years) - 1.0 } else { 0.0 };

    let daily_returns = portfolio_math::daily_returns(curve);
    let mean_daily: f64 = if daily_returns.is_empty() { 0.0 } else { daily_returns.iter().sum::<f64>() / daily_returns.len() as f64 };
    let std_daily = {
        if daily_returns.len() < 2 {
            0.0
        } else {
            let variance = daily_returns.iter().map(|r| (r - mean_daily).powi(2)).sum::<f64>() / (daily_returns.len() as f64 - 1.0);
            variance.sqrt()
        }
    };
    let annualized_vol = std_daily * TRADING_DAYS_PER_YEAR.sqrt();

    // Sharpe is 0 on zero volatility, matching the scorer's rule (distinct
    // from the portfolio engine's -infinity rule for the same edge case).
    let sharpe = if annualized_vol == 0.0 { 0.0 } else { (mean_daily * TRADING_DAYS_PER_YEAR) / annualized_vol };

    let mut cummax = curve[0];
    let mut max_drawdown = 0.0_f64;
    for &v in curve {
        if v > cummax {
            cummax = v;
        }
        if cummax > 0.0 {
            let dd = v / cummax - 1.0;
            if dd < max_drawdown {
                max_drawdown = dd;
            }
        }
    }

    BacktestMetrics {
        total_return_pct: total_return * 100.0,
        cagr_pct: cagr * 100.0,
        annualized_vol_pct: annualized_vol * 100.0,
        sharpe_ratio: sharpe,
        max_drawdown_pct: max_drawdown * 100.0,
    }
}

fn build_equity_curve(
    dates: &[NaiveDate],
    weighted_series: &[(f64, &[(NaiveDate, f64)])],
    initial_investment: f64,
) -> Vec<f64> {
    let first_day_prices: Vec<f64> = weighted_series
        .iter()
        .map(|(_, series)| {
            series
                .iter()
                .find(|(d, _)| *d == dates[0])
                .map(|(_, p)| *p)
                .unwrap_or(1.0)
        })
        .collect();

    dates
        .iter()
        .map(|date| {
            weighted_series
                .iter()
                .zip(first_day_prices.iter())
                .map(|((weight, series), first_price)| {
                    let price = series.iter().find(|(d, _)| d == date).map(|(_, p)| *p).unwrap_or(*first_price);
                    weight * (price / first_price) * initial_investment
                })
                .sum()
        })
        .collect()
}

/// Run the backtest for `portfolio` against `benchmark_closes`, restricted
/// to dates common to every series.
pub fn run_backtest(
    portfolio: &PortfolioResult,
    stock_closes: &HashMap<String, Vec<(NaiveDate, f64)>>,
    benchmark_closes: &[(NaiveDate, f64)],
    initial_investment: f64,
    run_id: &str,
) -> Option<BacktestResult> {
    if portfolio.stocks.is_empty() {
        return None;
    }

    let mut common: Option<BTreeSet<NaiveDate>> = None;
    for stock in &portfolio.stocks {
        let dates: BTreeSet<NaiveDate> = stock_closes.get(stock)?.iter().map(|(d, _)| *d).collect();
        common = Some(match common {
            Some(existing) => existing.intersection(&dates).copied().collect(),
            None => dates,
        });
    }
    let benchmark_dates: BTreeSet<NaiveDate> = benchmark_closes.iter().map(|(d, _)| *d).collect();
    let common: Vec<NaiveDate> = common?.intersection(&benchmark_dates).copied().collect();

    if common.len() < 2 {
        return None;
    }

    let series: Vec<(f64, &[(NaiveDate, f64)])> = portfolio
        .stocks
        .iter()
        .zip(portfolio.weights.iter())
        .map(|(stock, &w)| (w, stock_closes[stock].as_slice()))
        .collect();

    let portfolio_curve = build_equity_curve(&common, &series, initial_investment);
    let benchmark_series = [(1.0, benchmark_closes)];
    let benchmark_curve = build_equity_curve(&common, &benchmark_series, initial_investment);

    Some(BacktestResult {
        run_id: run_id.to_string(),
        portfolio: calculate_backtest_metrics(&common, &portfolio_curve),
        benchmark: calculate_backtest_metrics(&common, &benchmark_curve),
        dates: common,
        equity_curve_portfolio: portfolio_curve,
        equity_curve_benchmark: benchmark_curve,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(start: f64, daily_growth: f64, days: usize, start_date: NaiveDate) -> Vec<(NaiveDate, f64)> {
        let mut price = start;
        (0..days)
            .map(|i| {
                let date = start_date + chrono::Duration::days(i as i64);
                if i > 0 {
                    price *= 1.0 + daily_growth;
                }
                (date, price)
            })
            .collect()
    }

    #[test]
    fn metrics_are_zero_for_flat_curve() {
        let dates = vec![NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()];
        let curve = vec![1000.0, 1000.0];
        let m = calculate_backtest_metrics(&dates, &curve);
        assert_eq!(m.total_return_pct, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
    }

    #[test]
    fn run_backtest_aligns_common_dates_and_computes_positive_return() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut stock_closes = HashMap::new();
        stock_closes.insert("PETR4".to_string(), series(10.0, 0.001, 100, start));
        let benchmark = series(100.0, 0.0005, 100, start);

        let portfolio = PortfolioResult {
            run_id: "run-1".to_string(),
            timestamp: "ts".to_string(),
            engine_version: "0.1.0".to_string(),
            min_stocks: 1,
            max_stocks: 1,
            stocks: vec!["PETR4".to_string()],
            weights: vec![1.0],
            sharpe_ratio: 1.0,
            expected_return_annual_pct: 10.0,
            expected_volatility_annual_pct: 5.0,
        };

        let result = run_backtest(&portfolio, &stock_closes, &benchmark, 10_000.0, "run-1").unwrap();
        assert!(result.portfolio.total_return_pct > 0.0);
        assert_eq!(result.dates.len(), 100);
    }

    #[test]
    fn empty_portfolio_yields_no_result() {
        let portfolio = PortfolioResult {
            run_id: "run-1".to_string(),
            timestamp: "ts".to_string(),
            engine_version: "0.1.0".to_string(),
            min_stocks: 0,
            max_stocks: 0,
            stocks: vec![],
            weights: vec![],
            sharpe_ratio: 0.0,
            expected_return_annual_pct: 0.0,
            expected_volatility_annual_pct: 0.0,
        };
        assert!(run_backtest(&portfolio, &HashMap::new(), &[], 10_000.0, "run-1").is_none());
    }
}
