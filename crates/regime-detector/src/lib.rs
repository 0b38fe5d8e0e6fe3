//! Classifies the current market regime from the cross-universe mean daily
//! return series, and blends a risk profile's metric tendencies with it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    StrongBull,
    Bull,
    Neutral,
    Bear,
    StrongBear,
}

impl Regime {
    /// Multiplier applied to blended profile strength; more bullish regimes
    /// lean harder into the profile's tendencies.
    pub fn multiplier(self) -> f64 {
        match self {
            Regime::StrongBull => 1.5,
            Regime::Bull => 1.2,
            Regime::Neutral => 1.0,
            Regime::Bear => 0.8,
            Regime::StrongBear => 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegimeThresholds {
    pub strong_bull: f64,
    pub bull: f64,
    pub bear: f64,
    pub strong_bear: f64,
    pub bear_vol_percentile: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            strong_bull: 0.20,
            bull: 0.05,
            bear: -0.05,
            strong_bear: -0.20,
            bear_vol_percentile: 0.85,
        }
    }
}

const MIN_OBSERVATIONS: usize = 20;

/// Classify the regime from `cross_universe_returns` (daily), using the
/// trailing `lookback_days` window. Historical rolling-window volatilities
/// are computed over the full series to get the current window's
/// percentile rank.
pub fn detect_regime(
    cross_universe_returns: &[f64],
    lookback_days: usize,
    thresholds: RegimeThresholds,
) -> Regime {
    if cross_universe_returns.len() < MIN_OBSERVATIONS {
        return Regime::Neutral;
    }

    let window = &cross_universe_returns[cross_universe_returns.len().saturating_sub(lookback_days)..];
    if window.len() < MIN_OBSERVATIONS {
        return Regime::Neutral;
    }

    let mean_daily: f64 = window.iter().sum::<f64>() / window.len() as f64;
    let trend = mean_daily * portfolio_math::TRADING_DAYS_PER_YEAR;

    let current_vol = rolling_std(window);
    let vol_percentile = volatility_percentile(cross_universe_returns, lookback_days, current_vol);

    if trend > thresholds.strong_bull && vol_percentile < 0.7 {
        Regime::StrongBull
    } else if trend > thresholds.bull {
        Regime::Bull
    } else if trend < thresholds.strong_bear || vol_percentile > thresholds.bear_vol_percentile {
        Regime::StrongBear
    } else if trend < thresholds.bear {
        Regime::Bear
    } else {
        Regime::Neutral
    }
}

fn rolling_std(window: &[f64]) -> f64 {
    if window.len() < 2 {
        return 0.0;
    }
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

/// Fraction of historical rolling-window volatilities (same window length,
/// computed across the full series) below the current window's vol.
fn volatility_percentile(full_series: &[f64], window_len: usize, current_vol: f64) -> f64 {
    if full_series.len() < window_len {
        return 0.5;
    }
    let historical_vols: Vec<f64> = full_series.windows(window_len).map(rolling_std).collect();
    if historical_vols.is_empty() {
        return 0.5;
    }
    let below = historical_vols.iter().filter(|&&v| v < current_vol).count();
    below as f64 / historical_vols.len() as f64
}

/// Per-metric tendency and multiplier for one risk profile.
#[derive(Debug, Clone, Copy)]
pub struct ProfileTendencies {
    pub sharpe_tendency: f64,
    pub upside_tendency: f64,
    pub momentum_tendency: f64,
    pub sharpe_mult: f64,
    pub upside_mult: f64,
    pub momentum_mult: f64,
}

impl Default for ProfileTendencies {
    fn default() -> Self {
        Self {
            sharpe_tendency: 0.40,
            upside_tendency: 0.35,
            momentum_tendency: 0.25,
            sharpe_mult: 1.0,
            upside_mult: 1.0,
            momentum_mult: 1.0,
        }
    }
}

/// Blend a base static weight vector with a profile's tendencies, scaled
/// by `profile_strength` and (if `auto_regime`) the detected regime's
/// multiplier, then renormalize so the three weights sum to 1.
pub fn blend_weights(
    base: (f64, f64, f64),
    profile: ProfileTendencies,
    profile_strength: f64,
    regime: Option<Regime>,
) -> (f64, f64, f64) {
    let s = match regime {
        Some(r) => (profile_strength * r.multiplier()).min(1.0),
        None => profile_strength,
    };

    let blend = |w_base: f64, tendency: f64, mult: f64| (1.0 - s) * w_base + s * (tendency * mult);

    let w_sharpe = blend(base.0, profile.sharpe_tendency, profile.sharpe_mult);
    let w_upside = blend(base.1, profile.upside_tendency, profile.upside_mult);
    let w_momentum = blend(base.2, profile.momentum_tendency, profile.momentum_mult);

    let total = w_sharpe + w_upside + w_momentum;
    if total < 1e-12 {
        return base;
    }
    (w_sharpe / total, w_upside / total, w_momentum / total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_series_is_neutral() {
        let returns = vec![0.01; 5];
        assert_eq!(detect_regime(&returns, 60, RegimeThresholds::default()), Regime::Neutral);
    }

    #[test]
    fn strong_uptrend_low_vol_is_strong_bull() {
        let returns = vec![0.003; 80];
        assert_eq!(detect_regime(&returns, 60, RegimeThresholds::default()), Regime::StrongBull);
    }

    #[test]
    fn strong_downtrend_is_strong_bear() {
        let returns = vec![-0.003; 80];
        assert_eq!(detect_regime(&returns, 60, RegimeThresholds::default()), Regime::StrongBear);
    }

    #[test]
    fn blend_weights_renormalizes_to_one() {
        let (a, b, c) = blend_weights((0.4, 0.35, 0.25), ProfileTendencies::default(), 0.5, Some(Regime::Bull));
        assert!((a + b + c - 1.0).abs() < 1e-9);
    }

    #[test]
    fn blend_weights_with_no_regime_uses_raw_strength() {
        let (a, b, c) = blend_weights((0.4, 0.35, 0.25), ProfileTendencies::default(), 0.0, None);
        assert!((a - 0.4).abs() < 1e-9);
        assert!((b - 0.35).abs() < 1e-9);
        assert!((c - 0.25).abs() < 1e-9);
    }
}
