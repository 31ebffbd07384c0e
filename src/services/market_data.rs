//! Market data gateway interface and an in-memory implementation.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{Bar, DateRange, Instrument, Interval};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarketDataError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("no data for {0}")]
    NotFound(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("malformed data: {0}")]
    Malformed(String),
    /// Raised by the retry loop, never by a gateway
    #[error("fetch cancelled")]
    Cancelled,
}

impl MarketDataError {
    /// RateLimited and Transient are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketDataError::RateLimited(_) | MarketDataError::Transient(_))
    }
}

#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Historical bars for an instrument, oldest first
    async fn fetch(
        &self,
        instrument: &Instrument,
        range: &DateRange,
        interval: Interval,
    ) -> Result<Vec<Bar>, MarketDataError>;
}

/// Gateway serving fixed bars per symbol, with optional scripted responses
/// that are consumed before the fixed bars.
#[derive(Default, Clone)]
pub struct StaticMarketData {
    bars: Arc<RwLock<HashMap<String, Vec<Bar>>>>,
    scripted: Arc<RwLock<HashMap<String, VecDeque<Result<Vec<Bar>, MarketDataError>>>>>,
    calls: Arc<RwLock<HashMap<String, u32>>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_bars(self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.set_bars(symbol, bars).await;
        self
    }

    pub async fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        self.bars.write().await.insert(symbol.to_uppercase(), bars);
    }

    /// Queue `times` copies of `error` ahead of the fixed bars
    pub async fn fail_times(&self, symbol: &str, error: MarketDataError, times: u32) {
        let mut scripted = self.scripted.write().await;
        let queue = scripted.entry(symbol.to_uppercase()).or_default();
        for _ in 0..times {
            queue.push_back(Err(error.clone()));
        }
    }

    /// Number of fetches seen for a symbol
    pub async fn calls(&self, symbol: &str) -> u32 {
        self.calls
            .read()
            .await
            .get(&symbol.to_uppercase())
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl MarketDataGateway for StaticMarketData {
    async fn fetch(
        &self,
        instrument: &Instrument,
        _range: &DateRange,
        _interval: Interval,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let symbol = instrument.symbol.to_uppercase();
        *self.calls.write().await.entry(symbol.clone()).or_insert(0) += 1;

        if let Some(next) = self
            .scripted
            .write()
            .await
            .get_mut(&symbol)
            .and_then(|queue| queue.pop_front())
        {
            return next;
        }

        self.bars
            .read()
            .await
            .get(&symbol)
            .cloned()
            .ok_or(MarketDataError::NotFound(symbol))
    }
}
