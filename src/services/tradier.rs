//! Tradier market data gateway
//!
//! Daily history comes from `GET {base}/markets/history`. Tradier returns a
//! single object instead of a list when the range holds one bar, and a null
//! `history` when there is none.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::models::{Bar, DateRange, Instrument, Interval};
use crate::services::market_data::{MarketDataError, MarketDataGateway};

pub const DEFAULT_BASE_URL: &str = "https://api.tradier.com/v1";

#[derive(Debug, Deserialize)]
struct HistoryBar {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: u64,
}

pub struct TradierMarketData {
    client: Client,
    base_url: String,
    token: String,
}

impl TradierMarketData {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self::with_client(base_url, token, client))
    }

    pub fn with_client(base_url: impl Into<String>, token: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn parse_history(symbol: &str, body: Value) -> Result<Vec<Bar>, MarketDataError> {
        let days = match body.get("history") {
            Some(Value::Object(history)) => history.get("day").cloned(),
            _ => None,
        };

        let raw: Vec<HistoryBar> = match days {
            Some(Value::Array(items)) => serde_json::from_value(Value::Array(items)),
            Some(single @ Value::Object(_)) => serde_json::from_value(single).map(|bar| vec![bar]),
            _ => return Err(MarketDataError::NotFound(symbol.to_string())),
        }
        .map_err(|e| MarketDataError::Malformed(format!("{}: {}", symbol, e)))?;

        if raw.is_empty() {
            return Err(MarketDataError::NotFound(symbol.to_string()));
        }

        let mut bars: Vec<Bar> = raw
            .into_iter()
            .map(|b| Bar::new(b.date, b.open, b.high, b.low, b.close, b.volume))
            .collect();
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }
}

#[async_trait]
impl MarketDataGateway for TradierMarketData {
    async fn fetch(
        &self,
        instrument: &Instrument,
        range: &DateRange,
        interval: Interval,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let url = format!("{}/markets/history", self.base_url);
        let start = range.start.format("%Y-%m-%d").to_string();
        let end = range.end.format("%Y-%m-%d").to_string();

        debug!(symbol = %instrument.symbol, %start, %end, "Tradier: requesting history");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .query(&[
                ("symbol", instrument.symbol.as_str()),
                ("interval", interval.as_str()),
                ("start", start.as_str()),
                ("end", end.as_str()),
            ])
            .send()
            .await
            .map_err(|e| MarketDataError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited(instrument.symbol.clone()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(MarketDataError::NotFound(instrument.symbol.clone()));
        }
        if status.is_server_error() {
            return Err(MarketDataError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(MarketDataError::Malformed(format!("HTTP {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| MarketDataError::Malformed(e.to_string()))?;

        Self::parse_history(&instrument.symbol, body)
    }
}
