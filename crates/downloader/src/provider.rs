//! Price/financials provider abstraction. A live HTTP client and a
//! fixture-backed test double both implement [`PriceProvider`], so the
//! download loop never depends on a concrete data source.

use async_trait::async_trait;
use chrono::NaiveDate;
use domain::{PriceBar, ProviderError};
use serde::Deserialize;

/// Whatever the provider can tell us about a ticker without pulling full
/// history: tradability plus the fundamentals snapshot the Scorer's
/// valuation path needs (forward P/E, forward EPS, dividend yield, average
/// volume, analyst target, current price).
#[derive(Debug, Clone, Copy, Default)]
pub struct TickerMetadata {
    pub is_tradable: bool,
    pub forward_pe: Option<f64>,
    pub forward_eps: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub average_volume: Option<f64>,
    pub target_mean_price: Option<f64>,
    pub current_price: Option<f64>,
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn fetch_metadata(&self, ticker: &str) -> Result<TickerMetadata, ProviderError>;

    async fn fetch_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, ProviderError>;
}

/// Quote/history client speaking to a configurable HTTP endpoint. No crate
/// in the corpus wraps a Brazilian quote provider directly, so this hits a
/// generic JSON quote/history API shape (the same one the reconciliation
/// fixtures in tests assume) using `reqwest`, the teacher's HTTP stack.
pub struct HttpPriceProvider {
    client: reqwest::Client,
    quote_base_url: String,
    history_base_url: String,
}

impl HttpPriceProvider {
    pub fn new(quote_base_url: impl Into<String>, history_base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            quote_base_url: quote_base_url.into(),
            history_base_url: history_base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    tradable: Option<bool>,
    #[serde(default)]
    delisted: Option<bool>,
    #[serde(default, rename = "forwardPE")]
    forward_pe: Option<f64>,
    #[serde(default, rename = "forwardEps")]
    forward_eps: Option<f64>,
    #[serde(default, rename = "dividendYield")]
    dividend_yield: Option<f64>,
    #[serde(default, rename = "averageVolume")]
    average_volume: Option<f64>,
    #[serde(default, rename = "targetMeanPrice")]
    target_mean_price: Option<f64>,
    #[serde(default, rename = "currentPrice")]
    current_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    bars: Vec<HistoryBar>,
}

#[derive(Debug, Deserialize)]
struct HistoryBar {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[async_trait]
impl PriceProvider for HttpPriceProvider {
    async fn fetch_metadata(&self, ticker: &str) -> Result<TickerMetadata, ProviderError> {
        let url = format!("{}/{}", self.quote_base_url, ticker);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Network {
                ticker: ticker.to_string(),
                message: e.to_string(),
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::InvalidTicker(ticker.to_string()));
        }

        let quote: QuoteResponse = resp.json().await.map_err(|e| ProviderError::Network {
            ticker: ticker.to_string(),
            message: e.to_string(),
        })?;

        let is_tradable = quote.tradable.unwrap_or(true) && !quote.delisted.unwrap_or(false);
        Ok(TickerMetadata {
            is_tradable,
            forward_pe: quote.forward_pe,
            forward_eps: quote.forward_eps,
            dividend_yield: quote.dividend_yield,
            average_volume: quote.average_volume,
            target_mean_price: quote.target_mean_price,
            current_price: quote.current_price,
        })
    }

    async fn fetch_history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, ProviderError> {
        let url = format!(
            "{}/{}?start={}&end={}",
            self.history_base_url, ticker, start, end
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Network {
                ticker: ticker.to_string(),
                message: e.to_string(),
            })?;

        let history: HistoryResponse = resp.json().await.map_err(|e| ProviderError::Network {
            ticker: ticker.to_string(),
            message: e.to_string(),
        })?;

        if history.bars.is_empty() {
            return Err(ProviderError::EmptyResponseForRequestedDate {
                ticker: ticker.to_string(),
                date: format!("{start}..{end}"),
            });
        }

        Ok(history
            .bars
            .into_iter()
            .map(|b| PriceBar {
                date: b.date,
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
                volume: b.volume,
            })
            .collect())
    }
}
