//! Bounded-parallel dispatch of analysis units
//!
//! One task per instrument, at most `limit` running at once. Every task is
//! awaited, so the returned set always covers every instrument: completed,
//! failed, panicked or cancelled.

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::analysis::unit::AnalysisUnit;
use crate::core::cancel::CancelSignal;
use crate::metrics::Metrics;
use crate::models::{AnalysisResult, Instrument};

pub struct AnalysisScheduler {
    limit: usize,
    metrics: Option<Arc<Metrics>>,
}

/// Keeps the in-flight gauge honest even when a unit panics
struct InFlight(Option<Arc<Metrics>>);

impl InFlight {
    fn enter(metrics: Option<Arc<Metrics>>) -> Self {
        if let Some(m) = &metrics {
            m.analysis_units_total.inc();
            m.analysis_units_in_flight.inc();
        }
        Self(metrics)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(m) = &self.0 {
            m.analysis_units_in_flight.dec();
        }
    }
}

impl AnalysisScheduler {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `unit` over every instrument and return results ordered by instrument
    pub async fn run(
        &self,
        instruments: &[Instrument],
        unit: Arc<dyn AnalysisUnit>,
        cancel: &CancelSignal,
    ) -> Vec<AnalysisResult> {
        let semaphore = Arc::new(Semaphore::new(self.limit));

        info!(
            instruments = instruments.len(),
            limit = self.limit,
            "Scheduler: dispatching {} analysis units",
            instruments.len()
        );

        let handles: Vec<_> = instruments
            .iter()
            .cloned()
            .map(|instrument| {
                let semaphore = semaphore.clone();
                let unit = unit.clone();
                let cancel = cancel.clone();
                let metrics = self.metrics.clone();

                tokio::spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    };
                    let Some(_permit) = permit else {
                        return AnalysisResult::failed(instrument, "cancelled before dispatch", 0);
                    };

                    let _in_flight = InFlight::enter(metrics);
                    unit.analyze(&instrument, &cancel).await
                })
            })
            .collect();

        let joined = join_all(handles).await;

        let mut results: Vec<AnalysisResult> = instruments
            .iter()
            .zip(joined)
            .map(|(instrument, outcome)| match outcome {
                Ok(result) => result,
                Err(e) => {
                    error!(symbol = %instrument.symbol, error = %e, "Scheduler: analysis unit aborted");
                    AnalysisResult::failed(
                        instrument.clone(),
                        format!("analysis unit aborted: {}", e),
                        0,
                    )
                }
            })
            .collect();

        results.sort_by(|a, b| a.instrument.cmp(&b.instrument));

        let failed = results.iter().filter(|r| r.is_error()).count();
        if let Some(m) = &self.metrics {
            m.analysis_units_failed_total.inc_by(failed as u64);
        }
        debug!(
            total = results.len(),
            failed,
            "Scheduler: all analysis units returned"
        );
        results
    }
}
