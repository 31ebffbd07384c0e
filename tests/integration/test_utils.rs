//! Fixtures shared by the integration tests: bars, instrumented stores and
//! sinks, and helpers that wait on a session's progress.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use setupflow::config::{EngineConfig, RetryConfig};
use setupflow::models::{
    Alert, Bar, Checkpoint, DateRange, DecisionRequest, Instrument, Interval, Session,
    SessionId, SessionState,
};
use setupflow::services::{
    MarketDataError, MarketDataGateway, NotificationError, NotificationSink, StaticMarketData,
};
use setupflow::store::{CheckpointStore, MemoryCheckpointStore, StoreError};
use setupflow::workflow::{WorkflowContext, WorkflowEngine, WorkflowError};

pub fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + ChronoDuration::days(offset)
}

pub fn bar(offset: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar::new(day(offset), open, high, low, close, 500_000)
}

/// Long reversal priced at R/R 1.0, below the default threshold
pub fn aaa_bars() -> Vec<Bar> {
    vec![
        bar(0, 101.8, 102.0, 100.0, 100.2),
        bar(1, 101.0, 101.2, 100.9, 101.0),
    ]
}

/// Long reversal priced at R/R ~2.33
pub fn ccc_bars() -> Vec<Bar> {
    vec![
        bar(0, 101.8, 102.0, 100.0, 100.2),
        bar(1, 100.5, 100.7, 100.4, 100.6),
    ]
}

/// Short reversal priced at R/R ~2.33
pub fn eee_bars() -> Vec<Bar> {
    vec![
        bar(0, 100.2, 102.0, 100.0, 101.8),
        bar(1, 101.5, 101.6, 101.3, 101.4),
    ]
}

pub fn instruments(symbols: &[&str]) -> Vec<Instrument> {
    symbols.iter().map(|s| Instrument::new(*s)).collect()
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig::new(3).with_delays(Duration::from_millis(1), Duration::from_millis(5))
}

/// No benchmark, fast retries, a long approval window rejecting on timeout
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_benchmark(None)
        .with_fetch_retry(fast_retry())
        .with_notify_retry(fast_retry())
        .with_approval_timeout(
            Duration::from_secs(60),
            setupflow::models::TimeoutPolicy::Reject,
        )
}

/// AAA (discarded), CCC and EEE (pending), BBB rate limited on every attempt
pub async fn fixture_market() -> StaticMarketData {
    let market = StaticMarketData::new()
        .with_bars("AAA", aaa_bars())
        .await
        .with_bars("BBB", aaa_bars())
        .await
        .with_bars("CCC", ccc_bars())
        .await
        .with_bars("EEE", eee_bars())
        .await;
    market
        .fail_times("BBB", MarketDataError::RateLimited("429".to_string()), 10)
        .await;
    market
}

pub fn build_engine(
    config: EngineConfig,
    market: Arc<dyn MarketDataGateway>,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn NotificationSink>,
) -> WorkflowEngine {
    WorkflowEngine::new(WorkflowContext::new(market, store, sink, config))
}

/// Memory store that also keeps every checkpoint it accepted
#[derive(Clone, Default)]
pub struct RecordingStore {
    inner: MemoryCheckpointStore,
    history: Arc<Mutex<Vec<Checkpoint>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<Checkpoint> {
        self.history.lock().unwrap().clone()
    }

    pub fn states(&self, session_id: &str) -> Vec<SessionState> {
        self.history()
            .iter()
            .filter(|c| c.session_id() == session_id)
            .map(|c| c.session.state)
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for RecordingStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.inner.save(checkpoint).await?;
        self.history.lock().unwrap().push(checkpoint.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Checkpoint, StoreError> {
        self.inner.load(session_id).await
    }

    async fn list_unresolved(&self) -> Result<Vec<SessionId>, StoreError> {
        self.inner.list_unresolved().await
    }
}

/// Memory store refusing the listed save numbers (1-based)
pub struct FlakyStore {
    inner: MemoryCheckpointStore,
    saves: AtomicUsize,
    fail_on: Mutex<HashSet<usize>>,
}

impl FlakyStore {
    pub fn failing_on(saves: &[usize]) -> Self {
        Self {
            inner: MemoryCheckpointStore::new(),
            saves: AtomicUsize::new(0),
            fail_on: Mutex::new(saves.iter().copied().collect()),
        }
    }

    /// Refuse whichever save comes next
    pub fn fail_next_save(&self) {
        let next = self.saves.load(Ordering::SeqCst) + 1;
        self.fail_on.lock().unwrap().insert(next);
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.lock().unwrap().contains(&n) {
            return Err(StoreError::Unavailable(format!("disk full on write {}", n)));
        }
        self.inner.save(checkpoint).await
    }

    async fn load(&self, session_id: &str) -> Result<Checkpoint, StoreError> {
        self.inner.load(session_id).await
    }

    async fn list_unresolved(&self) -> Result<Vec<SessionId>, StoreError> {
        self.inner.list_unresolved().await
    }
}

/// Sink recording delivered alerts. Scripted failures are consumed first;
/// `set_down(true)` makes every delivery fail as unreachable.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Alert>>,
    scripted: Mutex<VecDeque<NotificationError>>,
    down: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn down() -> Arc<Self> {
        let sink = Self::default();
        sink.down.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_next(&self, error: NotificationError) {
        self.scripted.lock().unwrap().push_back(error);
    }

    pub fn delivered(&self) -> Vec<Alert> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.scripted.lock().unwrap().pop_front() {
            return Err(error);
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(NotificationError::Unreachable("connection refused".to_string()));
        }
        self.delivered.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Gateway that never answers
pub struct StallingMarketData;

#[async_trait]
impl MarketDataGateway for StallingMarketData {
    async fn fetch(
        &self,
        _instrument: &Instrument,
        _range: &DateRange,
        _interval: Interval,
    ) -> Result<Vec<Bar>, MarketDataError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(MarketDataError::Transient("stalled".to_string()))
    }
}

/// Gateway delegating to fixed bars while counting overlapping fetches
pub struct CountingMarketData {
    inner: StaticMarketData,
    current: AtomicUsize,
    pub max_seen: AtomicUsize,
}

impl CountingMarketData {
    pub fn new(inner: StaticMarketData) -> Self {
        Self {
            inner,
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MarketDataGateway for CountingMarketData {
    async fn fetch(
        &self,
        instrument: &Instrument,
        range: &DateRange,
        interval: Interval,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.inner.fetch(instrument, range, interval).await
    }
}

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Poll the engine until `predicate` holds for the session
pub async fn wait_for<F>(engine: &WorkflowEngine, session_id: &str, predicate: F) -> Session
where
    F: Fn(&Session) -> bool,
{
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        if let Ok(session) = engine.session(session_id).await {
            if predicate(&session) {
                return session;
            }
        }
        if Instant::now() > deadline {
            let last = engine.session(session_id).await.map(|s| s.state);
            panic!("timed out waiting on session {}: last state {:?}", session_id, last);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(engine: &WorkflowEngine, session_id: &str, state: SessionState) -> Session {
    wait_for(engine, session_id, |s| s.state == state).await
}

pub async fn wait_for_terminal(engine: &WorkflowEngine, session_id: &str) -> Session {
    wait_for(engine, session_id, |s| s.state.is_terminal()).await
}

/// Wait until the session is pending approval. A published pending state
/// always has its decision slot open.
pub async fn wait_for_pending(engine: &WorkflowEngine, session_id: &str) -> Session {
    wait_for_state(engine, session_id, SessionState::PendingApproval).await
}

/// Approve every pending setup whenever a decision is asked for, until the
/// session is terminal
pub async fn approve_until_terminal(engine: &WorkflowEngine, session_id: &str) -> Session {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        let session = engine.session(session_id).await.unwrap();
        if session.state.is_terminal() {
            return session;
        }
        if session.state == SessionState::PendingApproval {
            let _ = engine
                .submit_decision(session_id, DecisionRequest::approve(session.pending_ids()))
                .await;
        }
        if Instant::now() > deadline {
            panic!("session {} stuck in {}", session_id, session.state);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Keep asking for redelivery until the engine refuses, returning the refusal.
/// While a driver is still delivering, redeliver is accepted as a no-op.
pub async fn redeliver_until_refused(engine: &WorkflowEngine, session_id: &str) -> WorkflowError {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        if let Err(e) = engine.redeliver(session_id).await {
            return e;
        }
        if Instant::now() > deadline {
            panic!("redeliver for {} was never refused", session_id);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
