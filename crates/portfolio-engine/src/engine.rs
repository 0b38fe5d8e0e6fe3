//! Orchestrates the exact/heuristic k-sweep, the refinement pass, and the
//! composition of the final [`PortfolioResult`] / [`BestPortfolioDetails`].

use crate::combinations::Combinations;
use crate::config::{GaConfig, SimulationConfig};
use crate::ga::run_ga;
use crate::sampler::{adaptive_weight_sampler, compute_moments};
use domain::{BestPortfolioDetails, ConcentrationRisk, MomentumValuation, PortfolioResult};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;

pub struct EngineInput<'a> {
    pub tickers: &'a [String],
    pub sectors: &'a HashMap<String, String>,
    /// `returns_matrix[i]` is `tickers[i]`'s daily return series; all
    /// series share a common, already-aligned date index.
    pub returns_matrix: &'a [Vec<f64>],
    pub k_min: usize,
    pub k_max: usize,
    pub heuristic_threshold_k: usize,
    pub max_stocks_per_sector: Option<usize>,
}

struct Candidate {
    combo: Vec<usize>,
    weights: Vec<f64>,
    sharpe: f64,
    exp_ret: f64,
    vol: f64,
}

fn sector_constraint_ok(
    combo: &[usize],
    tickers: &[String],
    sectors: &HashMap<String, String>,
    max_per_sector: Option<usize>,
) -> bool {
    let Some(limit) = max_per_sector else { return true };
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for &i in combo {
        let sector = sectors.get(&tickers[i]).map(|s| s.as_str()).unwrap_or("unknown");
        let c = counts.entry(sector).or_insert(0);
        *c += 1;
        if *c > limit {
            return false;
        }
    }
    true
}

/// Run the exact phase for a single `k`, returning every evaluated
/// candidate (feeds the refinement pool) plus this `k`'s best.
fn run_exact_for_k(
    k: usize,
    input: &EngineInput,
    sim_config: &SimulationConfig,
    overall_best_bits: &AtomicU64,
    seed: u64,
) -> Vec<Candidate> {
    let combos: Vec<Vec<usize>> = Combinations::new(input.tickers.len(), k)
        .filter(|c| sector_constraint_ok(c, input.tickers, input.sectors, input.max_stocks_per_sector))
        .collect();

    combos
        .into_par_iter()
        .enumerate()
        .map(|(idx, combo)| {
            let subset_returns: Vec<Vec<f64>> = combo.iter().map(|&i| input.returns_matrix[i].clone()).collect();
            let moments = compute_moments(&subset_returns);
            let result = adaptive_weight_sampler(
                k,
                &moments,
                sim_config,
                overall_best_bits,
                seed.wrapping_add(idx as u64),
                false,
                None,
            );
            Candidate {
                combo,
                weights: result.best_weights,
                sharpe: result.best_sharpe,
                exp_ret: result.best_exp_ret,
                vol: result.best_vol,
            }
        })
        .collect()
}

pub struct PortfolioSearchOutcome {
    pub stocks: Vec<String>,
    pub weights: Vec<f64>,
    pub sharpe: f64,
    pub exp_ret: f64,
    pub vol: f64,
}

/// Run the full k-sweep (exact enumeration below the heuristic threshold,
/// GA above it) plus the refinement pass, returning the overall best
/// portfolio found.
pub fn run_portfolio_search(
    input: &EngineInput,
    sim_config: &SimulationConfig,
    ga_config: &GaConfig,
    seed: u64,
) -> Option<PortfolioSearchOutcome> {
    let overall_best_bits = AtomicU64::new(f64::NEG_INFINITY.to_bits());
    let mut refinement_pool: Vec<Candidate> = Vec::new();
    let mut best: Option<Candidate> = None;

    for k in input.k_min..=input.k_max {
        if k == 0 || k > input.tickers.len() {
            continue;
        }

        if k <= input.heuristic_threshold_k {
            let candidates = run_exact_for_k(k, input, sim_config, &overall_best_bits, seed.wrapping_add(k as u64));
            for c in candidates {
                if best.as_ref().map(|b| c.sharpe > b.sharpe).unwrap_or(true) {
                    best = Some(Candidate { combo: c.combo.clone(), weights: c.weights.clone(), sharpe: c.sharpe, exp_ret: c.exp_ret, vol: c.vol });
                }
                refinement_pool.push(c);
            }
        } else {
            let sector_ok = |combo: &[usize]| {
                sector_constraint_ok(combo, input.tickers, input.sectors, input.max_stocks_per_sector)
            };
            if let Some(outcome) = run_ga(
                input.tickers.len(),
                k,
                input.returns_matrix,
                ga_config,
                sim_config,
                &sector_ok,
                seed.wrapping_add(k as u64 * 97),
            ) {
                let candidate = Candidate {
                    combo: outcome.best_combo,
                    weights: outcome.best_weights,
                    sharpe: outcome.best_sharpe,
                    exp_ret: outcome.best_exp_ret,
                    vol: outcome.best_vol,
                };
                if best.as_ref().map(|b| candidate.sharpe > b.sharpe).unwrap_or(true) {
                    best = Some(candidate);
                }
            }
        }
    }

    if !refinement_pool.is_empty() {
        refinement_pool.sort_by(|a, b| b.sharpe.partial_cmp(&a.sharpe).unwrap_or(std::cmp::Ordering::Equal));
        let top_n = ((refinement_pool.len() as f64 * sim_config.top_n_percent_refinement).ceil() as usize).max(1);

        for candidate in refinement_pool.iter().take(top_n) {
            let subset_returns: Vec<Vec<f64>> =
                candidate.combo.iter().map(|&i| input.returns_matrix[i].clone()).collect();
            let moments = compute_moments(&subset_returns);
            let refined = adaptive_weight_sampler(
                candidate.combo.len(),
                &moments,
                sim_config,
                &overall_best_bits,
                seed.wrapping_add(9999).wrapping_add(candidate.combo.len() as u64),
                true,
                Some(sim_config.sim_runs),
            );
            if best.as_ref().map(|b| refined.best_sharpe > b.sharpe).unwrap_or(true) {
                best = Some(Candidate {
                    combo: candidate.combo.clone(),
                    weights: refined.best_weights,
                    sharpe: refined.best_sharpe,
                    exp_ret: refined.best_exp_ret,
                    vol: refined.best_vol,
                });
            }
        }
    }

    best.map(|b| PortfolioSearchOutcome {
        stocks: b.combo.iter().map(|&i| input.tickers[i].clone()).collect(),
        weights: b.weights,
        sharpe: b.sharpe,
        exp_ret: b.exp_ret,
        vol: b.vol,
    })
}

/// Compose the persisted [`PortfolioResult`] row from a search outcome.
pub fn build_portfolio_result(
    outcome: &PortfolioSearchOutcome,
    run_id: &str,
    timestamp: &str,
    engine_version: &str,
    min_stocks: usize,
    max_stocks: usize,
) -> PortfolioResult {
    PortfolioResult {
        run_id: run_id.to_string(),
        timestamp: timestamp.to_string(),
        engine_version: engine_version.to_string(),
        min_stocks,
        max_stocks,
        stocks: outcome.stocks.clone(),
        weights: outcome.weights.clone(),
        sharpe_ratio: outcome.sharpe,
        expected_return_annual_pct: outcome.exp_ret * 100.0,
        expected_volatility_annual_pct: outcome.vol * 100.0,
    }
}

/// Inputs needed to enrich a search outcome into the full
/// [`BestPortfolioDetails`] analytics block. Any per-ticker metric that's
/// missing for a held stock causes that stock's contribution to the
/// corresponding weighted metric to be skipped, not zero-filled.
pub struct EnrichmentInputs<'a> {
    pub sectors: &'a HashMap<String, String>,
    pub momentum: &'a HashMap<String, f64>,
    pub forward_pe: &'a HashMap<String, f64>,
    pub dividend_yield: &'a HashMap<String, f64>,
    pub benchmark_forward_pe: Option<f64>,
    pub initial_investment: f64,
}

pub fn build_best_portfolio_details(
    outcome: &PortfolioSearchOutcome,
    enrichment: &EnrichmentInputs,
) -> BestPortfolioDetails {
    let mut sector_exposure: HashMap<String, f64> = HashMap::new();
    for (stock, weight) in outcome.stocks.iter().zip(outcome.weights.iter()) {
        let sector = enrichment.sectors.get(stock).cloned().unwrap_or_else(|| "unknown".to_string());
        *sector_exposure.entry(sector).or_insert(0.0) += weight;
    }

    let hhi = portfolio_math::herfindahl_index(&outcome.weights);
    let mut ranked: Vec<(String, f64)> = outcome.stocks.iter().cloned().zip(outcome.weights.iter().copied()).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let top_5_holdings: Vec<(String, f64)> = ranked.into_iter().take(5).collect();
    let top_5_holdings_pct = top_5_holdings.iter().map(|(_, w)| w).sum();

    let weighted_sum = |metrics: &HashMap<String, f64>| -> Option<f64> {
        let mut total_weight = 0.0;
        let mut total = 0.0;
        for (stock, weight) in outcome.stocks.iter().zip(outcome.weights.iter()) {
            if let Some(value) = metrics.get(stock) {
                total += value * weight;
                total_weight += weight;
            }
        }
        if total_weight < 1e-12 {
            None
        } else {
            Some(total / total_weight)
        }
    };

    let portfolio_momentum = weighted_sum(enrichment.momentum);
    let portfolio_forward_pe = weighted_sum(enrichment.forward_pe);
    let portfolio_dividend_yield = weighted_sum(enrichment.dividend_yield);

    BestPortfolioDetails {
        stocks: outcome.stocks.clone(),
        weights: outcome.weights.clone(),
        sharpe_ratio: outcome.sharpe,
        expected_return_annual_pct: outcome.exp_ret * 100.0,
        expected_volatility_annual_pct: outcome.vol * 100.0,
        initial_investment: enrichment.initial_investment,
        sector_exposure,
        concentration_risk: ConcentrationRisk { hhi, top_5_holdings_pct, top_5_holdings },
        portfolio_weighted_pe: portfolio_forward_pe,
        momentum_valuation: MomentumValuation {
            portfolio_momentum,
            portfolio_forward_pe,
            benchmark_forward_pe: enrichment.benchmark_forward_pe,
            portfolio_dividend_yield,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_returns(n_assets: usize, n_days: usize) -> Vec<Vec<f64>> {
        (0..n_assets)
            .map(|a| (0..n_days).map(|d| ((a * 5 + d * 2) % 13) as f64 / 150.0 - 0.04).collect())
            .collect()
    }

    #[test]
    fn search_finds_a_portfolio_within_k_range() {
        let tickers: Vec<String> = (0..8).map(|i| format!("T{i}")).collect();
        let sectors: HashMap<String, String> = tickers.iter().map(|t| (t.clone(), "Sector".to_string())).collect();
        let returns = synthetic_returns(8, 80);
        let input = EngineInput {
            tickers: &tickers,
            sectors: &sectors,
            returns_matrix: &returns,
            k_min: 2,
            k_max: 4,
            heuristic_threshold_k: 9,
            max_stocks_per_sector: None,
        };
        let sim_config = SimulationConfig { sim_runs: 20, adaptive_sim_enabled: false, ..Default::default() };
        let ga_config = GaConfig::default();
        let outcome = run_portfolio_search(&input, &sim_config, &ga_config, 11).unwrap();
        assert!(outcome.stocks.len() >= 2 && outcome.stocks.len() <= 4);
        assert!((outcome.weights.iter().sum::<f64>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn best_portfolio_details_skips_missing_metrics() {
        let outcome = PortfolioSearchOutcome {
            stocks: vec!["A".to_string(), "B".to_string()],
            weights: vec![0.6, 0.4],
            sharpe: 1.2,
            exp_ret: 0.15,
            vol: 0.1,
        };
        let sectors: HashMap<String, String> = [("A".to_string(), "Energy".to_string())].into_iter().collect();
        let momentum: HashMap<String, f64> = [("A".to_string(), 0.05)].into_iter().collect();
        let enrichment = EnrichmentInputs {
            sectors: &sectors,
            momentum: &momentum,
            forward_pe: &HashMap::new(),
            dividend_yield: &HashMap::new(),
            benchmark_forward_pe: None,
            initial_investment: 10_000.0,
        };
        let details = build_best_portfolio_details(&outcome, &enrichment);
        assert_eq!(details.momentum_valuation.portfolio_momentum, Some(0.05));
        assert_eq!(details.momentum_valuation.portfolio_forward_pe, None);
        assert_eq!(details.sector_exposure.get("unknown"), Some(&0.4));
    }
}
