//! Trigger starting periodic scan sessions, on a cron schedule where the
//! interval fits one and a plain interval otherwise

use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::models::Instrument;
use crate::workflow::WorkflowEngine;

/// Cron expression firing every `interval_seconds`, if a single step field
/// expresses that period exactly. Steps must divide their field's range or
/// the schedule drifts at each wrap (`*/45` seconds fires at :00 and :45).
pub fn cron_expression(interval_seconds: u64) -> Option<String> {
    // second minute hour day month weekday
    match interval_seconds {
        0 => None,
        s if s < 60 => (60 % s == 0).then(|| format!("*/{} * * * * *", s)),
        s if s % 60 != 0 => None,
        s if s < 3600 => {
            let minutes = s / 60;
            (60 % minutes == 0).then(|| format!("0 */{} * * * *", minutes))
        }
        s if s % 3600 != 0 => None,
        s if s < 86_400 => {
            let hours = s / 3600;
            (24 % hours == 0).then(|| format!("0 0 */{} * * *", hours))
        }
        86_400 => Some("0 0 0 * * *".to_string()),
        _ => None,
    }
}

/// When the trigger fires
#[derive(Debug, Clone)]
pub enum Cadence {
    /// Aligned to the wall clock
    Cron(Schedule),
    /// Fixed period counted from start
    Every(Duration),
}

impl Cadence {
    pub fn for_interval(interval_seconds: u64) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        if interval_seconds == 0 {
            return Err("Scan trigger disabled: interval_seconds is 0".into());
        }
        match cron_expression(interval_seconds) {
            Some(expr) => {
                let schedule = Schedule::from_str(&expr)
                    .map_err(|e| format!("Invalid cron expression '{}': {}", expr, e))?;
                Ok(Cadence::Cron(schedule))
            }
            None => Ok(Cadence::Every(Duration::from_secs(interval_seconds))),
        }
    }
}

/// Starts a new scan session over a fixed watchlist on every tick.
/// Overlapping sessions are independent.
pub struct ScanTrigger {
    engine: WorkflowEngine,
    watchlist: Vec<Instrument>,
    cadence: Cadence,
    handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl ScanTrigger {
    pub fn new(
        engine: WorkflowEngine,
        watchlist: Vec<Instrument>,
        interval_seconds: u64,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        if watchlist.is_empty() {
            return Err("Scan trigger needs a non-empty watchlist".into());
        }
        let cadence = Cadence::for_interval(interval_seconds)?;

        match &cadence {
            Cadence::Cron(schedule) => info!(
                interval = interval_seconds,
                cron = %schedule,
                symbols = watchlist.len(),
                "ScanTrigger: created with interval {}s on a cron schedule",
                interval_seconds
            ),
            Cadence::Every(_) => info!(
                interval = interval_seconds,
                symbols = watchlist.len(),
                "ScanTrigger: created with interval {}s (no exact cron step, counting from start)",
                interval_seconds
            ),
        }

        Ok(Self {
            engine,
            watchlist,
            cadence,
            handle: Arc::new(RwLock::new(None)),
        })
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    pub async fn start(&self) {
        let engine = self.engine.clone();
        let watchlist = self.watchlist.clone();
        let cadence = self.cadence.clone();

        let handle = tokio::spawn(async move {
            match cadence {
                Cadence::Cron(schedule) => loop {
                    let Some(next_tick) = schedule.upcoming(chrono::Utc).next() else {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        continue;
                    };
                    let wait = (next_tick - chrono::Utc::now()).to_std().unwrap_or_default();
                    tokio::time::sleep(wait).await;
                    fire(&engine, &watchlist).await;
                },
                Cadence::Every(period) => {
                    let mut ticker = interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        ticker.tick().await;
                        fire(&engine, &watchlist).await;
                    }
                }
            }
        });

        let mut slot = self.handle.write().await;
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
        info!("ScanTrigger: started");
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.handle.write().await.take() {
            handle.abort();
            info!("ScanTrigger: stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle.read().await.is_some()
    }
}

async fn fire(engine: &WorkflowEngine, watchlist: &[Instrument]) {
    match engine.start_scan(watchlist.to_vec()).await {
        Ok(session_id) => {
            info!(session_id = %session_id, "ScanTrigger: scheduled scan started");
        }
        Err(e) => {
            error!(error = %e, "ScanTrigger: failed to start scheduled scan");
        }
    }
}
