//! Genetic-algorithm search over k-subsets of a ticker universe, used for
//! the "heuristic" portfolio sizes (`k > K*`) where exhaustive enumeration
//! is infeasible.

use crate::config::{GaConfig, SimulationConfig};
use crate::sampler::{adaptive_weight_sampler, compute_moments};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::AtomicU64;

#[derive(Debug, Clone)]
pub struct GaOutcome {
    pub best_combo: Vec<usize>,
    pub best_weights: Vec<f64>,
    pub best_sharpe: f64,
    pub best_exp_ret: f64,
    pub best_vol: f64,
    /// Best-so-far Sharpe at the end of each generation.
    pub generation_history: Vec<f64>,
}

type SectorCheck<'a> = dyn Fn(&[usize]) -> bool + 'a;

fn fitness(
    combo: &[usize],
    returns_matrix: &[Vec<f64>],
    sim_config: &SimulationConfig,
    overall_best_bits: &AtomicU64,
    seed: u64,
) -> (f64, Vec<f64>, f64, f64) {
    let subset_returns: Vec<Vec<f64>> = combo.iter().map(|&i| returns_matrix[i].clone()).collect();
    let moments = compute_moments(&subset_returns);
    let result = adaptive_weight_sampler(
        combo.len(),
        &moments,
        sim_config,
        overall_best_bits,
        seed,
        false,
        Some(sim_config.sim_runs),
    );
    (result.best_sharpe, result.best_weights, result.best_exp_ret, result.best_vol)
}

fn random_combo(universe_size: usize, k: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut all: Vec<usize> = (0..universe_size).collect();
    all.shuffle(rng);
    let mut combo: Vec<usize> = all.into_iter().take(k).collect();
    combo.sort_unstable();
    combo
}

fn initial_population(
    universe_size: usize,
    k: usize,
    config: &GaConfig,
    sector_ok: &SectorCheck,
    rng: &mut StdRng,
) -> Vec<Vec<usize>> {
    let mut seen = HashSet::new();
    let mut population = Vec::new();
    let max_attempts = config.population_size * config.init_pop_max_attempts_multiplier;
    let mut attempts = 0;

    while population.len() < config.population_size && attempts < max_attempts {
        attempts += 1;
        let combo = random_combo(universe_size, k, rng);
        if sector_ok(&combo) && seen.insert(combo.clone()) {
            population.push(combo);
        }
    }
    population
}

fn tournament_select<'a>(
    population: &'a [(Vec<usize>, f64)],
    tournament_size: usize,
    rng: &mut StdRng,
) -> &'a Vec<usize> {
    let size = tournament_size.min(population.len());
    let mut best: Option<&(Vec<usize>, f64)> = None;
    for _ in 0..size {
        let candidate = population.choose(rng).expect("population not empty");
        if best.map(|b| candidate.1 > b.1).unwrap_or(true) {
            best = Some(candidate);
        }
    }
    &best.expect("at least one candidate").0
}

fn repair_child(mut child: Vec<usize>, k: usize, universe_size: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut present: HashSet<usize> = child.iter().copied().collect();
    while present.len() < k {
        let candidate = rng.gen_range(0..universe_size);
        if present.insert(candidate) {
            child.push(candidate);
        }
    }
    // May have grown past k via the union; sample back down to exactly k.
    let mut unique: Vec<usize> = present.into_iter().collect();
    if unique.len() > k {
        unique.shuffle(rng);
        unique.truncate(k);
    }
    unique.sort_unstable();
    unique
}

fn crossover(parent_a: &[usize], parent_b: &[usize], k: usize, universe_size: usize, rng: &mut StdRng) -> Vec<usize> {
    if k < 2 {
        return parent_a.to_vec();
    }
    let split = rng.gen_range(1..k);
    let mut union: HashSet<usize> = parent_a[..split].iter().copied().collect();
    union.extend(parent_b[split..].iter().copied());
    repair_child(union.into_iter().collect(), k, universe_size, rng)
}

fn mutate(mut combo: Vec<usize>, universe_size: usize, rng: &mut StdRng) -> Vec<usize> {
    let present: HashSet<usize> = combo.iter().copied().collect();
    let candidates: Vec<usize> = (0..universe_size).filter(|i| !present.contains(i)).collect();
    if candidates.is_empty() || combo.is_empty() {
        return combo;
    }
    let replace_idx = rng.gen_range(0..combo.len());
    let new_gene = *candidates.choose(rng).expect("non-empty candidates");
    combo[replace_idx] = new_gene;
    combo.sort_unstable();
    combo
}

/// Run the GA over a ticker universe of `universe_size` assets, searching
/// for the best k-subset. `sector_ok` validates a combo against
/// `max_stocks_per_sector`-style constraints; pass `|_| true` to skip it.
#[allow(clippy::too_many_arguments)]
pub fn run_ga(
    universe_size: usize,
    k: usize,
    returns_matrix: &[Vec<f64>],
    ga_config: &GaConfig,
    sim_config: &SimulationConfig,
    sector_ok: &SectorCheck,
    seed: u64,
) -> Option<GaOutcome> {
    let mut rng = StdRng::seed_from_u64(seed);
    let overall_best_bits = AtomicU64::new(f64::NEG_INFINITY.to_bits());

    let initial = initial_population(universe_size, k, ga_config, sector_ok, &mut rng);
    if initial.is_empty() {
        return None;
    }

    let mut evaluated: Vec<(Vec<usize>, f64, Vec<f64>, f64, f64)> = initial
        .into_iter()
        .enumerate()
        .map(|(i, combo)| {
            let (sharpe, weights, exp_ret, vol) =
                fitness(&combo, returns_matrix, sim_config, &overall_best_bits, seed.wrapping_add(i as u64 + 1));
            (combo, sharpe, weights, exp_ret, vol)
        })
        .collect();

    let mut history = Vec::with_capacity(ga_config.num_generations);
    let mut best_so_far = evaluated
        .iter()
        .cloned()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap();
    history.push(best_so_far.1);

    for generation in 0..ga_config.num_generations {
        evaluated.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let elites: Vec<Vec<usize>> = evaluated
            .iter()
            .take(ga_config.elitism_count.min(evaluated.len()))
            .map(|(combo, ..)| combo.clone())
            .collect();

        let pool: Vec<(Vec<usize>, f64)> = evaluated.iter().map(|(c, s, ..)| (c.clone(), *s)).collect();

        let mut next_combos: Vec<Vec<usize>> = elites;
        while next_combos.len() < ga_config.population_size {
            let parent_a = tournament_select(&pool, ga_config.tournament_size, &mut rng).clone();
            let parent_b = tournament_select(&pool, ga_config.tournament_size, &mut rng).clone();

            let mut child = if rng.gen_range(0.0..1.0) < ga_config.crossover_rate {
                crossover(&parent_a, &parent_b, k, universe_size, &mut rng)
            } else {
                parent_a
            };

            if rng.gen_range(0.0..1.0) < ga_config.mutation_rate {
                child = mutate(child, universe_size, &mut rng);
            }

            if sector_ok(&child) {
                next_combos.push(child);
            }
        }

        evaluated = next_combos
            .into_iter()
            .enumerate()
            .map(|(i, combo)| {
                let seed_i = seed.wrapping_add((generation as u64 + 2) * 1000 + i as u64);
                let (sharpe, weights, exp_ret, vol) =
                    fitness(&combo, returns_matrix, sim_config, &overall_best_bits, seed_i);
                (combo, sharpe, weights, exp_ret, vol)
            })
            .collect();

        let gen_best = evaluated
            .iter()
            .cloned()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap();
        if gen_best.1 > best_so_far.1 {
            best_so_far = gen_best;
        }
        history.push(best_so_far.1);

        if history.len() > ga_config.convergence_generations {
            let window = &history[history.len() - ga_config.convergence_generations..];
            let range = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                - window.iter().cloned().fold(f64::INFINITY, f64::min);
            if range < ga_config.convergence_tolerance {
                break;
            }
        }
    }

    Some(GaOutcome {
        best_combo: best_so_far.0,
        best_weights: best_so_far.2,
        best_sharpe: best_so_far.1,
        best_exp_ret: best_so_far.3,
        best_vol: best_so_far.4,
        generation_history: history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_returns(n_assets: usize, n_days: usize) -> Vec<Vec<f64>> {
        (0..n_assets)
            .map(|a| {
                (0..n_days)
                    .map(|d| ((a * 7 + d * 3) % 11) as f64 / 100.0 - 0.05)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn ga_finds_a_valid_combo() {
        let returns = synthetic_returns(10, 60);
        let ga_config = GaConfig { population_size: 8, num_generations: 3, ..Default::default() };
        let sim_config = SimulationConfig { sim_runs: 20, adaptive_sim_enabled: false, ..Default::default() };
        let outcome = run_ga(10, 4, &returns, &ga_config, &sim_config, &|_| true, 7).unwrap();
        assert_eq!(outcome.best_combo.len(), 4);
        assert_eq!(outcome.best_weights.len(), 4);
    }

    #[test]
    fn sector_constraint_excludes_invalid_combos() {
        let returns = synthetic_returns(10, 60);
        let ga_config = GaConfig { population_size: 6, num_generations: 2, ..Default::default() };
        let sim_config = SimulationConfig { sim_runs: 10, adaptive_sim_enabled: false, ..Default::default() };
        // Only combos entirely within the first 5 assets are allowed.
        let sector_ok = |combo: &[usize]| combo.iter().all(|&i| i < 5);
        let outcome = run_ga(10, 3, &returns, &ga_config, &sim_config, &sector_ok, 3).unwrap();
        assert!(outcome.best_combo.iter().all(|&i| i < 5));
    }
}
