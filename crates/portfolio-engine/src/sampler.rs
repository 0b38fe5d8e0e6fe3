//! Adaptive Weight Sampler: draws random weight vectors for a fixed subset
//! of assets and tracks the best Sharpe found, with adaptive sim budgets,
//! early discard against the overall-best-so-far, and convergence-based
//! early stopping.

use crate::config::SimulationConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};

/// Annualized mean vector and covariance matrix for a fixed set of assets,
/// precomputed once per subset.
pub struct SubsetMoments {
    pub mu: Vec<f64>,
    pub cov: Vec<Vec<f64>>,
}

/// `returns_matrix[i]` is asset `i`'s daily return series; all series must
/// be the same length (already aligned on a common date index upstream).
pub fn compute_moments(returns_matrix: &[Vec<f64>]) -> SubsetMoments {
    let k = returns_matrix.len();
    let n = returns_matrix.first().map(|r| r.len()).unwrap_or(0);

    let mu: Vec<f64> = returns_matrix
        .iter()
        .map(|r| {
            if r.is_empty() {
                0.0
            } else {
                (r.iter().sum::<f64>() / r.len() as f64) * portfolio_math::TRADING_DAYS_PER_YEAR
            }
        })
        .collect();

    let means: Vec<f64> = returns_matrix
        .iter()
        .map(|r| if r.is_empty() { 0.0 } else { r.iter().sum::<f64>() / r.len() as f64 })
        .collect();

    let mut cov = vec![vec![0.0; k]; k];
    if n > 1 {
        for i in 0..k {
            for j in 0..k {
                let mut acc = 0.0;
                for t in 0..n {
                    acc += (returns_matrix[i][t] - means[i]) * (returns_matrix[j][t] - means[j]);
                }
                cov[i][j] = (acc / (n as f64 - 1.0)) * portfolio_math::TRADING_DAYS_PER_YEAR;
            }
        }
    }

    SubsetMoments { mu, cov }
}

/// Draw `k` uniform(0,1) values and normalize to sum to 1 — matching
/// `generate_portfolio_weights`'s `np.random.rand(n)` then divide-by-sum,
/// not a true Dirichlet draw.
pub fn generate_weights(k: usize, rng: &mut StdRng) -> Vec<f64> {
    let raw: Vec<f64> = (0..k).map(|_| rng.gen_range(0.0..1.0)).collect();
    let sum: f64 = raw.iter().sum();
    if sum < 1e-12 {
        return vec![1.0 / k as f64; k];
    }
    raw.into_iter().map(|w| w / sum).collect()
}

fn portfolio_vol(weights: &[f64], cov: &[Vec<f64>]) -> f64 {
    let k = weights.len();
    let mut acc = 0.0;
    for i in 0..k {
        for j in 0..k {
            acc += weights[i] * cov[i][j] * weights[j];
        }
    }
    acc.max(0.0).sqrt()
}

fn portfolio_return(weights: &[f64], mu: &[f64]) -> f64 {
    weights.iter().zip(mu.iter()).map(|(w, m)| w * m).sum()
}

/// (sharpe, exp_ret, vol). Sharpe is `-infinity` on zero volatility,
/// matching `_calculate_portfolio_metrics_from_precomputed` exactly — the
/// one place in the system that uses `-inf` rather than `0` for the
/// zero-vol case.
pub fn evaluate(weights: &[f64], moments: &SubsetMoments, rf: f64) -> (f64, f64, f64) {
    let exp_ret = portfolio_return(weights, &moments.mu);
    let vol = portfolio_vol(weights, &moments.cov);
    let sharpe = if vol == 0.0 { f64::NEG_INFINITY } else { (exp_ret - rf) / vol };
    (sharpe, exp_ret, vol)
}

#[derive(Debug, Clone)]
pub struct SamplerResult {
    pub best_sharpe: f64,
    pub best_weights: Vec<f64>,
    pub best_exp_ret: f64,
    pub best_vol: f64,
}

fn max_sims_for_k(k: usize, config: &SimulationConfig) -> usize {
    if !config.adaptive_sim_enabled {
        return config.sim_runs;
    }
    if k < 2 {
        return config.progressive_min_sims;
    }
    let ln_k = (k as f64).ln();
    let scaled = config.progressive_base_log_k * ln_k * ln_k;
    config
        .progressive_min_sims
        .max(scaled.min(config.progressive_max_sims_cap as f64) as usize)
}

/// Run the sampler for one subset of size `k`. `overall_best_sharpe_bits`
/// holds the cross-subset best Sharpe as raw `f64` bits for a lock-free
/// compare-and-update; staleness only weakens early discard, never the
/// final winner, since every subset still reports its true best back to
/// the caller.
#[allow(clippy::too_many_arguments)]
pub fn adaptive_weight_sampler(
    k: usize,
    moments: &SubsetMoments,
    config: &SimulationConfig,
    overall_best_sharpe_bits: &AtomicU64,
    seed: u64,
    disable_early_discard: bool,
    fixed_sim_runs: Option<usize>,
) -> SamplerResult {
    let mut rng = StdRng::seed_from_u64(seed);
    let max_sims = fixed_sim_runs.unwrap_or_else(|| max_sims_for_k(k, config));

    let mut best = SamplerResult {
        best_sharpe: f64::NEG_INFINITY,
        best_weights: vec![1.0 / k as f64; k],
        best_exp_ret: 0.0,
        best_vol: 0.0,
    };
    let mut recent_best_history: Vec<f64> = Vec::new();

    for sim in 0..max_sims {
        let weights = generate_weights(k, &mut rng);
        let (sharpe, exp_ret, vol) = evaluate(&weights, moments, config.risk_free_rate);

        if sharpe > best.best_sharpe {
            best = SamplerResult { best_sharpe: sharpe, best_weights: weights, best_exp_ret: exp_ret, best_vol: vol };
            update_overall_best(overall_best_sharpe_bits, sharpe);
        }
        recent_best_history.push(best.best_sharpe);

        if !disable_early_discard && sim + 1 == config.initial_scan_sims {
            let overall_best = f64::from_bits(overall_best_sharpe_bits.load(Ordering::Relaxed));
            if overall_best > config.early_discard_min_best_sharpe
                && best.best_sharpe < config.early_discard_factor * overall_best
            {
                break;
            }
        }

        if !disable_early_discard
            && sim + 1 >= config.progressive_min_sims
            && (sim + 1 - config.progressive_min_sims) % config.progressive_check_interval == 0
        {
            let window = config.progressive_convergence_window.min(recent_best_history.len());
            let tail = &recent_best_history[recent_best_history.len() - window..];
            let range = tail.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                - tail.iter().cloned().fold(f64::INFINITY, f64::min);
            if range < config.progressive_convergence_delta {
                break;
            }
        }
    }

    best
}

fn update_overall_best(bits: &AtomicU64, candidate: f64) {
    let mut current = bits.load(Ordering::Relaxed);
    loop {
        let current_val = f64::from_bits(current);
        if candidate <= current_val {
            return;
        }
        match bits.compare_exchange_weak(current, candidate.to_bits(), Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_weights_sums_to_one() {
        let mut rng = StdRng::seed_from_u64(42);
        let w = generate_weights(5, &mut rng);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn evaluate_returns_neg_infinity_on_zero_vol() {
        let moments = SubsetMoments { mu: vec![0.1, 0.1], cov: vec![vec![0.0, 0.0], vec![0.0, 0.0]] };
        let (sharpe, _, vol) = evaluate(&[0.5, 0.5], &moments, 0.0);
        assert_eq!(vol, 0.0);
        assert_eq!(sharpe, f64::NEG_INFINITY);
    }

    #[test]
    fn sampler_finds_a_finite_best_for_varying_assets() {
        let returns_matrix = vec![
            vec![0.01, 0.02, -0.01, 0.015, 0.005, -0.02, 0.01],
            vec![0.005, -0.01, 0.02, 0.0, -0.005, 0.015, 0.01],
        ];
        let moments = compute_moments(&returns_matrix);
        let config = SimulationConfig { sim_runs: 50, adaptive_sim_enabled: false, ..Default::default() };
        let overall_best = AtomicU64::new(f64::NEG_INFINITY.to_bits());
        let result = adaptive_weight_sampler(2, &moments, &config, &overall_best, 1, false, None);
        assert!(result.best_sharpe.is_finite());
    }

    #[test]
    fn max_sims_for_k_respects_cap() {
        let config = SimulationConfig::default();
        let sims = max_sims_for_k(50, &config);
        assert!(sims <= config.progressive_max_sims_cap);
        assert!(sims >= config.progressive_min_sims);
    }
}
