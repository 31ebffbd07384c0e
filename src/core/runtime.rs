//! Process runtime: resume unresolved sessions, then optionally schedule scans

use tracing::info;

use crate::config;
use crate::core::trigger::ScanTrigger;
use crate::models::{Instrument, SessionId};
use crate::workflow::WorkflowEngine;

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// 0 disables scheduled scans
    pub scan_interval_seconds: u64,
    pub watchlist: Vec<Instrument>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: 0,
            watchlist: config::parse_watchlist(None),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            scan_interval_seconds: config::get_scan_interval_seconds(),
            watchlist: config::get_watchlist(),
        }
    }
}

pub struct WorkflowRuntime {
    config: RuntimeConfig,
    engine: WorkflowEngine,
    trigger: Option<ScanTrigger>,
}

impl WorkflowRuntime {
    pub fn new(config: RuntimeConfig, engine: WorkflowEngine) -> Self {
        Self {
            config,
            engine,
            trigger: None,
        }
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Resume every unresolved session, then start the scan trigger if one
    /// is configured. Returns the resumed session ids.
    pub async fn start(&mut self) -> Result<Vec<SessionId>, Box<dyn std::error::Error + Send + Sync>> {
        let resumed = self.engine.resume_unresolved().await?;
        info!(resumed = resumed.len(), "WorkflowRuntime: resumed {} sessions", resumed.len());

        if self.config.scan_interval_seconds > 0 {
            let trigger = ScanTrigger::new(
                self.engine.clone(),
                self.config.watchlist.clone(),
                self.config.scan_interval_seconds,
            )?;
            trigger.start().await;
            self.trigger = Some(trigger);
        } else {
            info!("WorkflowRuntime: scheduled scans disabled (set SCAN_INTERVAL_SECONDS to enable)");
        }

        Ok(resumed)
    }

    pub async fn stop(&self) {
        if let Some(trigger) = &self.trigger {
            trigger.stop().await;
        }
        self.engine.shutdown().await;
    }

    pub fn is_scheduling(&self) -> bool {
        self.trigger.is_some()
    }

    pub fn trigger(&self) -> Option<&ScanTrigger> {
        self.trigger.as_ref()
    }
}
