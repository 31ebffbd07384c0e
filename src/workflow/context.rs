//! Collaborators shared by every session the engine drives

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::metrics::Metrics;
use crate::services::market_data::MarketDataGateway;
use crate::services::notification::NotificationSink;
use crate::store::CheckpointStore;

pub struct WorkflowContext {
    pub market_data: Arc<dyn MarketDataGateway>,
    pub store: Arc<dyn CheckpointStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub metrics: Option<Arc<Metrics>>,
    pub config: EngineConfig,
}

impl WorkflowContext {
    pub fn new(
        market_data: Arc<dyn MarketDataGateway>,
        store: Arc<dyn CheckpointStore>,
        notifier: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            market_data,
            store,
            notifier,
            metrics: None,
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}
