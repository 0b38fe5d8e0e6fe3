use thiserror::Error;

/// Errors raised while loading or validating layered parameter files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required parameter '{0}'")]
    MissingKey(String),

    #[error("invalid value for '{key}': expected {expected}, got '{value}'")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("parameters file not found: {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by store writes (SkipStore, MasterDB, JSON artifacts).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("atomic write to '{path}' failed: {source}")]
    AtomicWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the price/financials provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("network error fetching {ticker}: {message}")]
    Network { ticker: String, message: String },

    #[error("no data returned for {ticker} on {date}")]
    EmptyResponseForRequestedDate { ticker: String, date: String },

    #[error("ticker '{0}' is invalid or delisted")]
    InvalidTicker(String),
}

/// Errors raised by the Scorer.
#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("validation failed: {0}")]
    ValidationError(String),
}

/// Errors raised by the Optimizer when required artifacts are missing or malformed.
#[derive(Error, Debug)]
pub enum OptimizationError {
    #[error("no current holdings found in ledger")]
    NoHoldings,

    #[error("no ideal portfolio found in latest run summary")]
    NoIdealPortfolio,

    #[error("optimization data error: {0}")]
    OptimizationDataError(String),
}
