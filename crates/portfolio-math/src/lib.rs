//! Pure statistical building blocks shared by the scorer, portfolio engine,
//! optimizer, and backtester. Stateless — no I/O, no async.

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Simple daily returns from a value series. Skips a step where the prior
/// value is zero rather than dividing by it.
pub fn daily_returns(values: &[f64]) -> Vec<f64> {
    if values.len() < 2 {
        return Vec::new();
    }
    values
        .windows(2)
        .filter_map(|w| if w[0] != 0.0 { Some((w[1] - w[0]) / w[0]) } else { None })
        .collect()
}

/// Annualized mean and standard deviation (sample, ddof=1) of a return series.
pub fn annualized_mean_std(returns: &[f64]) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let ann_mean = mean * TRADING_DAYS_PER_YEAR;
    if returns.len() < 2 {
        return (ann_mean, 0.0);
    }
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (ann_mean, variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Sharpe ratio from annualized mean/std. Returns `None` when `ann_std` is
/// (numerically) zero — callers decide the zero-volatility fallback value,
/// since that rule differs by component (0 in the scorer and backtester,
/// -infinity in the portfolio engine's GA/sampler).
pub fn sharpe_ratio_from_moments(ann_mean: f64, ann_std: f64, rf_annual: f64) -> Option<f64> {
    if ann_std < 1e-12 {
        return None;
    }
    Some((ann_mean - rf_annual) / ann_std)
}

/// Sharpe ratio computed directly from a daily return series.
pub fn sharpe_ratio(returns: &[f64], rf_annual: f64) -> Option<f64> {
    if returns.len() < 3 {
        return None;
    }
    let (ann_mean, ann_std) = annualized_mean_std(returns);
    sharpe_ratio_from_moments(ann_mean, ann_std, rf_annual)
}

/// Sortino ratio: only downside deviation below the daily risk-free rate
/// penalizes volatility. Returns a capped 99.99 when there's no downside and
/// excess return is positive (matches the no-risk-observed convention used
/// elsewhere in the codebase rather than an unbounded ratio).
pub fn sortino_ratio(returns: &[f64], rf_annual: f64) -> Option<f64> {
    if returns.len() < 3 {
        return None;
    }
    let rf_daily = rf_annual / TRADING_DAYS_PER_YEAR;
    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;
    let excess = mean - rf_daily;

    let downside: Vec<f64> = returns
        .iter()
        .filter(|&&r| r < rf_daily)
        .map(|r| (r - rf_daily).powi(2))
        .collect();

    if downside.is_empty() {
        return if excess > 0.0 { Some(99.99) } else { None };
    }
    let downside_dev = (downside.iter().sum::<f64>() / (n - 1.0)).sqrt();
    if downside_dev < 1e-12 {
        return if excess > 0.0 { Some(99.99) } else { None };
    }
    Some((excess / downside_dev) * TRADING_DAYS_PER_YEAR.sqrt())
}

/// (max_drawdown_pct, current_drawdown_pct) from an equity curve, both
/// expressed as positive fractions (0.15 = 15%).
pub fn max_drawdown(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mut peak = values[0];
    let mut max_dd = 0.0_f64;
    for &v in values {
        if v > peak {
            peak = v;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - v) / peak);
        }
    }
    let current_dd = if peak > 0.0 {
        (peak - values[values.len() - 1]) / peak
    } else {
        0.0
    };
    (max_dd, current_dd)
}

/// Rolling annualized volatility over the trailing `window` returns.
pub fn rolling_volatility(returns: &[f64], window: usize) -> Option<f64> {
    if returns.len() < window || window < 2 {
        return None;
    }
    let tail = &returns[returns.len() - window..];
    let n = tail.len() as f64;
    let mean: f64 = tail.iter().sum::<f64>() / n;
    let variance: f64 = tail.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Historical Value-at-Risk at `confidence` (e.g. 0.95), returned as a
/// positive loss fraction.
pub fn var_historical(returns: &[f64], confidence: f64) -> Option<f64> {
    if returns.len() < 10 {
        return None;
    }
    let mut sorted: Vec<f64> = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = (((1.0 - confidence) * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    Some(-sorted[idx])
}

/// Historical CVaR (expected shortfall) at `confidence`, as a positive loss.
pub fn cvar_historical(returns: &[f64], confidence: f64) -> Option<f64> {
    if returns.len() < 10 {
        return None;
    }
    let mut sorted: Vec<f64> = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let cutoff = (((1.0 - confidence) * sorted.len() as f64).floor() as usize)
        .max(1)
        .min(sorted.len());
    let tail = &sorted[..cutoff];
    let mean: f64 = tail.iter().sum::<f64>() / tail.len() as f64;
    Some(-mean)
}

/// OLS regression `y = alpha + beta*x`, returning `(alpha, beta, r_squared)`.
pub fn ols_regression(y: &[f64], x: &[f64]) -> (f64, f64, f64) {
    let n = y.len().min(x.len());
    if n < 3 {
        return (0.0, 1.0, 0.0);
    }
    let nf = n as f64;
    let x_mean: f64 = x[..n].iter().sum::<f64>() / nf;
    let y_mean: f64 = y[..n].iter().sum::<f64>() / nf;

    let (mut ss_xy, mut ss_xx, mut ss_yy) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let dx = x[i] - x_mean;
        let dy = y[i] - y_mean;
        ss_xy += dx * dy;
        ss_xx += dx * dx;
        ss_yy += dy * dy;
    }

    if ss_xx < 1e-15 {
        return (y_mean, 0.0, 0.0);
    }

    let beta = ss_xy / ss_xx;
    let alpha = y_mean - beta * x_mean;
    let r_squared = if ss_yy > 1e-15 { (ss_xy * ss_xy) / (ss_xx * ss_yy) } else { 0.0 };
    (alpha, beta, r_squared)
}

/// Pearson correlation coefficient between two equal-length series.
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (_, _, r_squared) = ols_regression(&a[..n], &b[..n]);
    let sign = {
        let mean_a: f64 = a[..n].iter().sum::<f64>() / n as f64;
        let mean_b: f64 = b[..n].iter().sum::<f64>() / n as f64;
        let cov: f64 = (0..n).map(|i| (a[i] - mean_a) * (b[i] - mean_b)).sum::<f64>();
        if cov < 0.0 { -1.0 } else { 1.0 }
    };
    sign * r_squared.sqrt()
}

/// Dense correlation matrix in `tickers` order, using `returns[ticker]`.
pub fn correlation_matrix(
    tickers: &[String],
    returns: &std::collections::HashMap<String, Vec<f64>>,
) -> Vec<Vec<f64>> {
    let n = tickers.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let empty = Vec::new();
            let a = returns.get(&tickers[i]).unwrap_or(&empty);
            let b = returns.get(&tickers[j]).unwrap_or(&empty);
            let corr = pearson_correlation(a, b);
            matrix[i][j] = corr;
            matrix[j][i] = corr;
        }
    }
    matrix
}

/// Tracking error (annualized std of return differences) vs a benchmark.
pub fn tracking_error(portfolio_returns: &[f64], benchmark_returns: &[f64]) -> f64 {
    let n = portfolio_returns.len().min(benchmark_returns.len());
    if n < 2 {
        return 0.0;
    }
    let diffs: Vec<f64> = (0..n).map(|i| portfolio_returns[i] - benchmark_returns[i]).collect();
    let mean: f64 = diffs.iter().sum::<f64>() / n as f64;
    let variance: f64 = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Herfindahl-Hirschman index from weights on a 0-1 scale. Higher = more
/// concentrated.
pub fn herfindahl_index(weights: &[f64]) -> f64 {
    weights.iter().map(|w| w * w).sum()
}

/// N-day momentum: percent change of the latest close vs. the close `n`
/// trading days earlier. `None` if the series is shorter than `n + 1`.
pub fn momentum(closes: &[f64], n: usize) -> Option<f64> {
    if closes.len() <= n || n == 0 {
        return None;
    }
    let past = closes[closes.len() - 1 - n];
    let latest = closes[closes.len() - 1];
    if past == 0.0 {
        return None;
    }
    Some((latest - past) / past)
}

/// Min-max normalize a series to `[0, 1]`. `+inf`/`-inf` are replaced with
/// NaN *before* computing min/max, so a single infinite outlier doesn't
/// collapse the whole column; an all-NaN-or-constant column gets a uniform
/// 0.5 fill. Any NaN remaining after division is filled with 0.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let cleaned: Vec<f64> = values
        .iter()
        .map(|&v| if v.is_infinite() { f64::NAN } else { v })
        .collect();

    let finite_min = cleaned.iter().copied().filter(|v| v.is_finite()).fold(f64::INFINITY, f64::min);
    let finite_max = cleaned
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);

    if !finite_min.is_finite() || !finite_max.is_finite() || (finite_max - finite_min).abs() < 1e-12 {
        return cleaned.iter().map(|_| 0.5).collect();
    }

    cleaned
        .iter()
        .map(|&v| {
            let normalized = (v - finite_min) / (finite_max - finite_min);
            if normalized.is_nan() { 0.0 } else { normalized }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_returns_basic() {
        let values = vec![100.0, 105.0, 103.0, 110.0];
        let returns = daily_returns(&values);
        assert_eq!(returns.len(), 3);
        assert!((returns[0] - 0.05).abs() < 1e-10);
    }

    #[test]
    fn sharpe_ratio_none_on_zero_volatility() {
        let returns = vec![0.01, 0.01, 0.01, 0.01, 0.01];
        assert_eq!(sharpe_ratio(&returns, 0.0), None);
    }

    #[test]
    fn sharpe_ratio_some_on_varying_returns() {
        let returns = vec![0.01, 0.02, -0.01, 0.015, 0.005, -0.005, 0.01, 0.02, -0.01, 0.015];
        assert!(sharpe_ratio(&returns, 0.02).is_some());
    }

    #[test]
    fn max_drawdown_basic() {
        let values = vec![100.0, 110.0, 105.0, 95.0, 100.0, 115.0, 108.0];
        let (max_dd, _) = max_drawdown(&values);
        assert!((max_dd - 15.0 / 110.0).abs() < 1e-6);
    }

    #[test]
    fn ols_regression_identity() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        let (alpha, beta, r2) = ols_regression(&y, &x);
        assert!((alpha).abs() < 1e-10);
        assert!((beta - 2.0).abs() < 1e-10);
        assert!((r2 - 1.0).abs() < 1e-10);
    }

    #[test]
    fn pearson_correlation_perfect_positive() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![2.0, 4.0, 6.0, 8.0];
        assert!((pearson_correlation(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn herfindahl_equal_weights() {
        let weights = vec![0.25, 0.25, 0.25, 0.25];
        assert!((herfindahl_index(&weights) - 0.25).abs() < 1e-10);
    }

    #[test]
    fn momentum_percent_change() {
        let closes = vec![10.0, 11.0, 12.0, 13.0, 14.0];
        assert!((momentum(&closes, 4).unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(momentum(&closes, 10), None);
    }

    #[test]
    fn min_max_normalize_handles_infinity_and_constant() {
        let values = vec![1.0, f64::INFINITY, 3.0];
        let normed = min_max_normalize(&values);
        assert_eq!(normed[0], 0.0);
        assert_eq!(normed[2], 1.0);
        assert_eq!(normed[1], 0.0); // filled after NaN division

        let constant = vec![5.0, 5.0, 5.0];
        let normed_const = min_max_normalize(&constant);
        assert!(normed_const.iter().all(|&v| (v - 0.5).abs() < 1e-12));
    }
}
