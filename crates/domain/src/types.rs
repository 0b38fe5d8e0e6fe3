use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A B3-listed ticker with its classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Ticker {
    pub symbol: String,
    pub sector: String,
    pub industry: String,
}

/// One OHLCV row for a ticker on a trading date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A single (ticker, date, bar) row as stored in MasterDB's CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterDbRow {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Where a stock's target price came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TargetSource {
    ProviderTarget,
    SectorPeFallback,
}

/// A snapshot of fundamental data for one ticker, matching
/// `FINANCIALS_DB_FILE`'s `Stock, forwardPE, forwardEPS, dividendYield,
/// averageVolume, targetMeanPrice, currentPrice, LastUpdated` schema.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Financials {
    #[serde(rename = "Stock")]
    pub ticker: String,
    #[serde(rename = "currentPrice", default)]
    pub current_price: Option<f64>,
    #[serde(rename = "targetMeanPrice", default)]
    pub target_price: Option<f64>,
    #[serde(rename = "forwardPE", default)]
    pub forward_pe: Option<f64>,
    #[serde(rename = "forwardEPS", default)]
    pub forward_eps: Option<f64>,
    #[serde(rename = "dividendYield", default)]
    pub dividend_yield: Option<f64>,
    #[serde(rename = "averageVolume", default)]
    pub average_volume: Option<f64>,
    #[serde(rename = "LastUpdated", default)]
    pub last_updated: String,
}

/// Consolidated skip map: ticker -> list of date strings (or `["ALL"]`).
pub type SkipMap = HashMap<String, Vec<String>>;

/// A scored stock as persisted to the ScoredStock DB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredStock {
    pub run_id: String,
    pub timestamp: String,
    pub ticker: String,
    pub sector: String,
    pub industry: String,
    pub composite_score: f64,
    pub sharpe_ratio: f64,
    pub sharpe_norm: f64,
    pub annualized_mean_return: f64,
    pub annualized_std_dev: f64,
    pub potential_upside: f64,
    pub upside_norm: f64,
    pub momentum: f64,
    pub momentum_norm: f64,
    pub current_price: f64,
    pub target_price: f64,
    pub forward_pe: f64,
    pub forward_eps: f64,
    pub sector_median_pe: f64,
    pub target_source: TargetSource,
    pub weight_sharpe: f64,
    pub weight_upside: f64,
    pub weight_momentum: f64,
    pub risk_profile_used: String,
    pub market_regime: String,
}

/// Per-sector median forward P/E for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorPe {
    pub run_id: String,
    pub sector: String,
    pub median_forward_pe: f64,
    pub sample_count: usize,
}

/// One row of the portfolio search results DB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioResult {
    pub run_id: String,
    pub timestamp: String,
    pub engine_version: String,
    pub min_stocks: usize,
    pub max_stocks: usize,
    pub stocks: Vec<String>,
    pub weights: Vec<f64>,
    pub sharpe_ratio: f64,
    pub expected_return_annual_pct: f64,
    pub expected_volatility_annual_pct: f64,
}

/// Concentration risk summary for the selected portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcentrationRisk {
    pub hhi: f64,
    pub top_5_holdings_pct: f64,
    pub top_5_holdings: Vec<(String, f64)>,
}

/// Momentum/valuation summary relative to a benchmark proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumValuation {
    pub portfolio_momentum: Option<f64>,
    pub portfolio_forward_pe: Option<f64>,
    pub benchmark_forward_pe: Option<f64>,
    pub portfolio_dividend_yield: Option<f64>,
}

/// The best portfolio found this run, with full derived analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestPortfolioDetails {
    pub stocks: Vec<String>,
    pub weights: Vec<f64>,
    pub sharpe_ratio: f64,
    pub expected_return_annual_pct: f64,
    pub expected_volatility_annual_pct: f64,
    pub initial_investment: f64,
    pub sector_exposure: HashMap<String, f64>,
    pub concentration_risk: ConcentrationRisk,
    pub portfolio_weighted_pe: Option<f64>,
    pub momentum_valuation: MomentumValuation,
}

/// `latest_run_summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestRunSummary {
    pub run_id: String,
    pub timestamp: String,
    pub best_portfolio_details: BestPortfolioDetails,
}

/// Buy/Sell side of a ledger trade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// One row of the trade ledger CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRow {
    pub trade_date: NaiveDate,
    pub ticker: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub fees: f64,
}

/// A current holding derived from the ledger (FIFO net position).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub net_qty: f64,
    pub avg_cost: f64,
}

/// Rebalance vs. hold decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Rebalance,
    Hold,
}

/// A proposed per-symbol weight change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDelta {
    pub ticker: String,
    pub side: Side,
    pub weight_delta: f64,
}

/// `optimized_recommendation.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub run_id: String,
    pub timestamp: String,
    pub decision: Decision,
    pub reason: String,
    pub blend_ratio: f64,
    pub holdings_expected_return_pct: f64,
    pub holdings_sharpe_ratio: f64,
    pub optimal_expected_return_pct: f64,
    pub optimal_sharpe_ratio: f64,
    pub transition_cost_pct: f64,
    pub transactions: Vec<TransactionDelta>,
}

/// Status of a pipeline stage, persisted in the run checkpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum StageStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

/// `data/run_checkpoint.json` — tracks runner progress across stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub stage: String,
    pub status: StageStatus,
    pub timestamp: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub attempt_count: u32,
}

/// One row of a stage's performance-timing log.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceRecord {
    pub run_start_timestamp: String,
    pub engine_version: String,
    pub stage: String,
    pub durations_s: HashMap<String, f64>,
    pub overall_duration_s: f64,
}
