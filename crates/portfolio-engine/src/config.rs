/// Tunables for the Adaptive Weight Sampler, refinement pool, and GA —
/// defaults match `A3_Portfolio.py::extract_simulation_parameters`.
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    pub sim_runs: usize,
    pub adaptive_sim_enabled: bool,
    pub progressive_min_sims: usize,
    pub progressive_base_log_k: f64,
    pub progressive_max_sims_cap: usize,
    pub progressive_convergence_window: usize,
    pub progressive_convergence_delta: f64,
    pub progressive_check_interval: usize,
    pub top_n_percent_refinement: f64,
    pub heuristic_threshold_k: usize,
    pub initial_scan_sims: usize,
    pub early_discard_factor: f64,
    pub early_discard_min_best_sharpe: f64,
    pub risk_free_rate: f64,
    pub max_stocks_per_sector: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sim_runs: 100,
            adaptive_sim_enabled: true,
            progressive_min_sims: 200,
            progressive_base_log_k: 500.0,
            progressive_max_sims_cap: 3000,
            progressive_convergence_window: 50,
            progressive_convergence_delta: 0.005,
            progressive_check_interval: 50,
            top_n_percent_refinement: 0.10,
            heuristic_threshold_k: 9,
            initial_scan_sims: 200,
            early_discard_factor: 0.75,
            early_discard_min_best_sharpe: 0.1,
            risk_free_rate: 0.0,
            max_stocks_per_sector: None,
        }
    }
}

/// GA tunables — defaults match `A3_Portfolio.py`'s GA section.
#[derive(Debug, Clone, Copy)]
pub struct GaConfig {
    pub population_size: usize,
    pub num_generations: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub elitism_count: usize,
    pub tournament_size: usize,
    pub convergence_generations: usize,
    pub convergence_tolerance: f64,
    pub init_pop_max_attempts_multiplier: usize,
}

impl Default for GaConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            num_generations: 30,
            mutation_rate: 0.02,
            crossover_rate: 0.8,
            elitism_count: 2,
            tournament_size: 3,
            convergence_generations: 10,
            convergence_tolerance: 0.0001,
            init_pop_max_attempts_multiplier: 5,
        }
    }
}
