//! Analysis units
//!
//! One invocation per instrument: fetch history with retries, validate it,
//! classify the last bar. Failures end up in the result, never as a panic or
//! an error that could abort sibling units.

use async_trait::async_trait;
use backon::Retryable;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analysis::classify::{classify, ClassifierConfig};
use crate::config::RetryConfig;
use crate::core::cancel::CancelSignal;
use crate::models::{AnalysisResult, Bar, DateRange, Instrument, Interval};
use crate::services::market_data::{MarketDataError, MarketDataGateway};

#[async_trait]
pub trait AnalysisUnit: Send + Sync {
    async fn analyze(&self, instrument: &Instrument, cancel: &CancelSignal) -> AnalysisResult;
}

/// History window requested for every instrument in a session
#[derive(Debug, Clone, Copy)]
pub struct HistoryRequest {
    pub range: DateRange,
    pub interval: Interval,
}

/// Fetch bars, retrying RateLimited/Transient with exponential backoff.
///
/// Returns the outcome and the number of attempts made. Cancellation stops
/// the retry loop and reports `MarketDataError::Cancelled`.
pub async fn fetch_with_retry(
    gateway: &dyn MarketDataGateway,
    instrument: &Instrument,
    request: &HistoryRequest,
    retry: &RetryConfig,
    cancel: &CancelSignal,
) -> (Result<Vec<Bar>, MarketDataError>, u32) {
    if cancel.is_cancelled() {
        return (Err(MarketDataError::Cancelled), 0);
    }

    let attempts = AtomicU32::new(0);
    let attempts_ref = &attempts;
    let range = &request.range;
    let interval = request.interval;

    let fetch = (move || async move {
        attempts_ref.fetch_add(1, Ordering::SeqCst);
        gateway.fetch(instrument, range, interval).await
    })
    .retry(retry.backoff())
    .sleep(tokio::time::sleep)
    .when(|e: &MarketDataError| e.is_retryable())
    .notify(|e: &MarketDataError, delay| {
        warn!(
            symbol = %instrument.symbol,
            error = %e,
            retry_in_ms = delay.as_millis() as u64,
            "Analysis: fetch failed, retrying"
        );
    });

    let outcome = tokio::select! {
        result = fetch => result,
        _ = cancel.cancelled() => Err(MarketDataError::Cancelled),
    };

    (outcome, attempts.load(Ordering::SeqCst))
}

/// Checks that bars are well formed and sorts them by date
pub fn validate_bars(symbol: &str, mut bars: Vec<Bar>) -> Result<Vec<Bar>, MarketDataError> {
    if let Some(bad) = bars.iter().find(|b| !b.is_well_formed()) {
        return Err(MarketDataError::Malformed(format!(
            "{}: inconsistent bar on {}",
            symbol, bad.date
        )));
    }
    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    Ok(bars)
}

/// Analysis unit backed by a market data gateway
pub struct MarketAnalysisUnit {
    gateway: Arc<dyn MarketDataGateway>,
    request: HistoryRequest,
    retry: RetryConfig,
    classifier: ClassifierConfig,
    benchmark: Option<Arc<Vec<Bar>>>,
}

impl MarketAnalysisUnit {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        request: HistoryRequest,
        retry: RetryConfig,
        classifier: ClassifierConfig,
    ) -> Self {
        Self {
            gateway,
            request,
            retry,
            classifier,
            benchmark: None,
        }
    }

    pub fn with_benchmark(mut self, benchmark: Option<Arc<Vec<Bar>>>) -> Self {
        self.benchmark = benchmark;
        self
    }
}

#[async_trait]
impl AnalysisUnit for MarketAnalysisUnit {
    async fn analyze(&self, instrument: &Instrument, cancel: &CancelSignal) -> AnalysisResult {
        let (outcome, attempts) = fetch_with_retry(
            self.gateway.as_ref(),
            instrument,
            &self.request,
            &self.retry,
            cancel,
        )
        .await;

        let bars = match outcome.and_then(|bars| validate_bars(&instrument.symbol, bars)) {
            Ok(bars) => bars,
            Err(e) => {
                warn!(symbol = %instrument.symbol, attempts, error = %e, "Analysis: instrument skipped");
                return AnalysisResult::failed(instrument.clone(), e.to_string(), attempts);
            }
        };

        let candidates = classify(
            &instrument.symbol,
            &bars,
            self.benchmark.as_deref().map(Vec::as_slice),
            &self.classifier,
        );

        debug!(
            symbol = %instrument.symbol,
            bars = bars.len(),
            candidates = candidates.len(),
            "Analysis: classified {}",
            instrument.symbol
        );
        AnalysisResult::completed(instrument.clone(), candidates, attempts)
    }
}
