pub mod combinations;
pub mod config;
pub mod engine;
pub mod ga;
pub mod sampler;

pub use config::{GaConfig, SimulationConfig};
pub use engine::{
    build_best_portfolio_details, build_portfolio_result, run_portfolio_search, EngineInput, EnrichmentInputs,
    PortfolioSearchOutcome,
};
