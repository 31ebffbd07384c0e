//! Setupflow server
//!
//! Resumes unresolved sessions, serves the HTTP control surface and
//! optionally starts scheduled scans.

use dotenvy::dotenv;
use setupflow::config::{self, EngineConfig, TradierConfig};
use setupflow::core::http::{start_server, AppState};
use setupflow::core::runtime::{RuntimeConfig, WorkflowRuntime};
use setupflow::logging;
use setupflow::metrics::Metrics;
use setupflow::services::market_data::{MarketDataGateway, StaticMarketData};
use setupflow::services::notification::{
    LogNotificationSink, NotificationSink, WebhookNotificationSink,
};
use setupflow::services::tradier::TradierMarketData;
use setupflow::store::{CheckpointStore, MemoryCheckpointStore, RedisCheckpointStore};
use setupflow::workflow::{WorkflowContext, WorkflowEngine};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    logging::init_logging();

    let port = config::get_port();
    let env = config::get_environment();
    let engine_config = EngineConfig::from_env()?;
    let runtime_config = RuntimeConfig::from_env();

    info!("Starting Setupflow server");
    info!(environment = %env, port, "Environment");
    info!(
        max_concurrency = engine_config.max_concurrency,
        min_risk_reward = engine_config.min_risk_reward,
        approval_timeout_secs = engine_config.approval.timeout.as_secs(),
        timeout_policy = ?engine_config.approval.timeout_policy,
        "Engine configuration"
    );

    let metrics = Arc::new(Metrics::new()?);

    let store: Arc<dyn CheckpointStore> = match config::get_redis_url() {
        Some(url) => match RedisCheckpointStore::connect(&url).await {
            Ok(store) => {
                info!("Redis checkpoint store connected");
                metrics.store_connected.set(1.0);
                Arc::new(store)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to Redis");
                return Err(format!("Redis connection required when REDIS_URL is set: {}", e).into());
            }
        },
        None => {
            warn!("REDIS_URL not set, checkpoints are kept in memory and lost on restart");
            Arc::new(MemoryCheckpointStore::new())
        }
    };

    let market_data: Arc<dyn MarketDataGateway> = match TradierConfig::from_env() {
        Some(tradier) => {
            info!(base_url = %tradier.base_url, "Using Tradier market data");
            Arc::new(TradierMarketData::new(tradier.base_url, tradier.token)?)
        }
        None => {
            warn!("TRADIER_API_ACCESS_TOKEN not set, market data gateway is empty");
            Arc::new(StaticMarketData::new())
        }
    };

    let notifier: Arc<dyn NotificationSink> = match config::get_webhook_url() {
        Some(url) => {
            info!(url = %url, "Delivering alerts to webhook");
            Arc::new(WebhookNotificationSink::new(url)?)
        }
        None => Arc::new(LogNotificationSink),
    };

    let context = WorkflowContext::new(market_data, store, notifier, engine_config)
        .with_metrics(metrics.clone());
    let engine = WorkflowEngine::new(context);

    let mut runtime = WorkflowRuntime::new(runtime_config, engine.clone());
    let resumed = runtime.start().await?;
    if !resumed.is_empty() {
        info!(sessions = ?resumed, "Resumed unresolved sessions");
    }

    let state = AppState::new(engine, metrics);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, state).await {
            error!(error = %e, "HTTP server error");
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutting down...");
        }
        _ = server_handle => {
            error!("HTTP server stopped");
        }
    }

    runtime.stop().await;
    Ok(())
}
