//! Workflow engine
//!
//! Drives each session through
//! `Idle -> Scanning -> Analyzing -> RiskAssessing -> PendingApproval -> Alerting -> Completed`,
//! with `Failed` and `Cancelled` reachable from any non-terminal state.
//!
//! Every session is owned by exactly one driver task, which is the only
//! writer of its checkpoints. A checkpoint is written after each transition
//! and the in-memory snapshot is published only once that write succeeded.
//! Terminal sessions leave the registry; queries then fall back to the store.

use backon::Retryable;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analysis::unit::{
    fetch_with_retry, validate_bars, AnalysisUnit, HistoryRequest, MarketAnalysisUnit,
};
use crate::config::EngineConfig;
use crate::core::cancel::CancelSignal;
use crate::core::scheduler::AnalysisScheduler;
use crate::models::{
    Alert, ApprovalDecision, Bar, Checkpoint, DateRange, DecisionRequest, DeliveryRecord,
    Instrument, Session, SessionId, SessionState, Setup,
};
use crate::services::notification::NotificationError;
use crate::store::StoreError;
use crate::workflow::approval::{ApprovalError, ApprovalGate};
use crate::workflow::context::WorkflowContext;
use crate::workflow::error::WorkflowError;
use crate::workflow::handlers;

type DecisionSlot = oneshot::Receiver<ApprovalDecision>;

/// What the driver does after a stage
enum Flow {
    Continue,
    /// Stop driving; the session stays registered and resumable
    Suspend,
}

struct SessionHandle {
    snapshot: Session,
    cancel: CancelSignal,
    driver: Option<JoinHandle<()>>,
}

impl SessionHandle {
    fn is_driving(&self) -> bool {
        self.driver.as_ref().is_some_and(|d| !d.is_finished())
    }
}

struct EngineInner {
    ctx: WorkflowContext,
    scheduler: AnalysisScheduler,
    gate: ApprovalGate,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    pub fn new(ctx: WorkflowContext) -> Self {
        let scheduler = AnalysisScheduler::new(ctx.config.max_concurrency)
            .with_metrics(ctx.metrics.clone());
        let gate = ApprovalGate::new(ctx.config.approval.timeout_policy);

        Self {
            inner: Arc::new(EngineInner {
                ctx,
                scheduler,
                gate,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.ctx.config
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.inner.gate
    }

    /// Create a session and return its id once the `Scanning` checkpoint is
    /// durable. Analysis runs in the background.
    pub async fn start_scan(&self, instruments: Vec<Instrument>) -> Result<SessionId, WorkflowError> {
        if instruments.is_empty() {
            return Err(WorkflowError::EmptyInstrumentSet);
        }

        let config = &self.inner.ctx.config;
        let range = DateRange::trailing_days(Utc::now().date_naive(), config.history_days);
        let mut session = Session::new(instruments, range, config.interval);

        if let Some(m) = &self.inner.ctx.metrics {
            m.sessions_started_total.inc();
        }
        info!(
            session_id = %session.id,
            instruments = session.instruments.len(),
            "Engine: scan requested for {} instruments",
            session.instruments.len()
        );

        self.inner.commit(&mut session, SessionState::Scanning).await?;

        let id = session.id.clone();
        let mut sessions = self.inner.sessions.write().await;
        self.inner
            .spawn_driver(&mut sessions, session, CancelSignal::new(), None);
        Ok(id)
    }

    /// Latest published state of a session, live or archived
    pub async fn session(&self, session_id: &str) -> Result<Session, WorkflowError> {
        if let Some(handle) = self.inner.sessions.read().await.get(session_id) {
            return Ok(handle.snapshot.clone());
        }
        Ok(self.inner.load(session_id).await?.session)
    }

    /// Setups awaiting a decision; empty unless the session is pending approval
    pub async fn pending_setups(&self, session_id: &str) -> Result<Vec<Setup>, WorkflowError> {
        let session = self.session(session_id).await?;
        if session.state == SessionState::PendingApproval {
            Ok(session.pending)
        } else {
            Ok(Vec::new())
        }
    }

    /// Non-terminal sessions held by this engine, oldest first
    pub async fn active_sessions(&self) -> Vec<Session> {
        let sessions = self.inner.sessions.read().await;
        let mut active: Vec<Session> = sessions.values().map(|h| h.snapshot.clone()).collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        active
    }

    pub async fn submit_decision(
        &self,
        session_id: &str,
        request: DecisionRequest,
    ) -> Result<ApprovalDecision, WorkflowError> {
        match self.inner.gate.submit_decision(session_id, request).await {
            Ok(decision) => Ok(decision),
            Err(ApprovalError::NotPending(_)) => {
                let session = self.session(session_id).await?;
                if session.state.is_past_approval() {
                    Err(ApprovalError::StaleDecision(session_id.to_string()).into())
                } else {
                    Err(ApprovalError::NotPending(session_id.to_string()).into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Signal cancellation. The session reaches `Cancelled` once its
    /// in-flight work has returned.
    pub async fn cancel(&self, session_id: &str) -> Result<(), WorkflowError> {
        {
            let mut sessions = self.inner.sessions.write().await;
            if let Some(handle) = sessions.get_mut(session_id) {
                handle.cancel.cancel();
                info!(session_id = %session_id, state = %handle.snapshot.state, "Engine: cancellation requested");

                if !handle.is_driving() {
                    let snapshot = handle.snapshot.clone();
                    let cancel = handle.cancel.clone();
                    self.inner.spawn_driver(&mut sessions, snapshot, cancel, None);
                }
                return Ok(());
            }
        }

        let checkpoint = self.inner.load(session_id).await?;
        if checkpoint.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(session_id.to_string()));
        }

        // Unresolved but not yet resumed here: drive it straight to Cancelled.
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(handle) => {
                handle.cancel.cancel();
            }
            None => {
                let cancel = CancelSignal::new();
                cancel.cancel();
                self.inner
                    .spawn_driver(&mut sessions, checkpoint.session, cancel, None);
            }
        }
        Ok(())
    }

    /// Re-drive delivery for a session left in `Alerting`
    pub async fn redeliver(&self, session_id: &str) -> Result<(), WorkflowError> {
        let mut sessions = self.inner.sessions.write().await;
        let Some(handle) = sessions.get_mut(session_id) else {
            drop(sessions);
            let checkpoint = self.inner.load(session_id).await?;
            return Err(if checkpoint.is_terminal() {
                WorkflowError::AlreadyTerminal(session_id.to_string())
            } else {
                WorkflowError::WrongState {
                    id: session_id.to_string(),
                    state: checkpoint.session.state,
                    expected: SessionState::Alerting,
                }
            });
        };

        if handle.snapshot.state != SessionState::Alerting {
            return Err(WorkflowError::WrongState {
                id: session_id.to_string(),
                state: handle.snapshot.state,
                expected: SessionState::Alerting,
            });
        }
        if handle.is_driving() {
            debug!(session_id = %session_id, "Engine: delivery already in progress");
            return Ok(());
        }
        if handle.snapshot.undelivered().is_empty() {
            return Err(WorkflowError::NothingToRedeliver(session_id.to_string()));
        }

        info!(session_id = %session_id, "Engine: re-driving alert delivery");
        let snapshot = handle.snapshot.clone();
        let cancel = handle.cancel.clone();
        self.inner.spawn_driver(&mut sessions, snapshot, cancel, None);
        Ok(())
    }

    /// Reload every session with a non-terminal checkpoint and re-enter it at
    /// its recorded state. Returns the ids that were resumed.
    pub async fn resume_unresolved(&self) -> Result<Vec<SessionId>, WorkflowError> {
        let ids = self.inner.ctx.store.list_unresolved().await?;
        let mut resumed = Vec::new();

        for id in ids {
            if self.inner.sessions.read().await.contains_key(&id) {
                continue;
            }

            let checkpoint = match self.inner.ctx.store.load(&id).await {
                Ok(checkpoint) => checkpoint,
                Err(StoreError::NotFound(_)) => {
                    warn!(session_id = %id, "Engine: unresolved session has no checkpoint");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if checkpoint.is_terminal() {
                continue;
            }

            info!(
                session_id = %id,
                state = %checkpoint.session.state,
                version = checkpoint.version,
                "Engine: resuming session from checkpoint"
            );

            let mut sessions = self.inner.sessions.write().await;
            if sessions.contains_key(&id) {
                continue;
            }
            if let Some(m) = &self.inner.ctx.metrics {
                m.sessions_started_total.inc();
            }

            // The slot must be open before the pending snapshot is visible.
            let approval = if checkpoint.session.state == SessionState::PendingApproval {
                let pending = checkpoint.session.pending_ids();
                Some(self.inner.gate.register(&id, pending).await)
            } else {
                None
            };
            self.inner
                .spawn_driver(&mut sessions, checkpoint.session, CancelSignal::new(), approval);
            resumed.push(id);
        }

        Ok(resumed)
    }

    /// Stop every driver without touching checkpoints, leaving sessions
    /// resumable by the next process.
    pub async fn shutdown(&self) {
        let mut sessions = self.inner.sessions.write().await;
        let count = sessions.len();
        for (id, handle) in sessions.drain() {
            if let Some(driver) = handle.driver {
                driver.abort();
            }
            self.inner.gate.forget(&id).await;
            debug!(session_id = %id, "Engine: driver stopped");
        }
        if let Some(m) = &self.inner.ctx.metrics {
            m.sessions_active.sub(count as i64);
        }
        info!(sessions = count, "Engine: shut down");
    }
}

impl EngineInner {
    /// Spawn the driver for `session`. The caller holds the registry lock, so
    /// the driver cannot publish before its handle is registered.
    ///
    /// `approval` is the receiver of a slot already opened for a session
    /// entering at `PendingApproval`.
    fn spawn_driver(
        self: &Arc<Self>,
        sessions: &mut HashMap<SessionId, SessionHandle>,
        session: Session,
        cancel: CancelSignal,
        approval: Option<DecisionSlot>,
    ) {
        let id = session.id.clone();
        let snapshot = session.clone();
        let inner = self.clone();
        let task_cancel = cancel.clone();
        let driver = tokio::spawn(async move { inner.drive(session, task_cancel, approval).await });

        let previous = sessions.insert(
            id,
            SessionHandle {
                snapshot,
                cancel,
                driver: Some(driver),
            },
        );
        if previous.is_none() {
            if let Some(m) = &self.ctx.metrics {
                m.sessions_active.inc();
            }
        }
    }

    async fn drive(self: Arc<Self>, mut session: Session, cancel: CancelSignal, mut approval: Option<DecisionSlot>) {
        debug!(session_id = %session.id, state = %session.state, "Engine: driver started");

        loop {
            if session.state.is_terminal() {
                break;
            }
            if cancel.is_cancelled() {
                self.gate.withdraw(&session.id).await;
                session.reason = Some("cancelled by operator".to_string());
                if let Err(e) = self.commit(&mut session, SessionState::Cancelled).await {
                    error!(session_id = %session.id, state = %session.state, error = %e, "Engine: cancellation could not be committed");
                }
                break;
            }

            let step = match session.state {
                SessionState::Idle => self
                    .commit(&mut session, SessionState::Scanning)
                    .await
                    .map(|_| Flow::Continue),
                SessionState::Scanning => self.scan(&mut session, &cancel).await,
                SessionState::Analyzing => self.assess(&mut session).await,
                SessionState::RiskAssessing => self.screen(&mut session, &mut approval).await,
                SessionState::PendingApproval => {
                    self.await_approval(&mut session, approval.take(), &cancel).await
                }
                SessionState::Alerting => self.alert(&mut session, &cancel).await,
                SessionState::Completed | SessionState::Failed | SessionState::Cancelled => break,
            };

            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::Suspend) => {
                    if self.release(&session.id, &cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    error!(session_id = %session.id, state = %session.state, error = %e, "Engine: session stopped");
                    break;
                }
            }
        }

        debug!(session_id = %session.id, state = %session.state, "Engine: driver finished");
    }

    /// Give up driving a suspended session. `cancel` and `redeliver` check
    /// the driver under the same lock, so a cancel that lands here is either
    /// seen now (returns `false`, keep driving) or finds no driver and
    /// spawns a new one.
    async fn release(&self, session_id: &str, cancel: &CancelSignal) -> bool {
        let mut sessions = self.sessions.write().await;
        if cancel.is_cancelled() {
            return false;
        }
        if let Some(handle) = sessions.get_mut(session_id) {
            handle.driver = None;
        }
        true
    }

    async fn scan(&self, session: &mut Session, cancel: &CancelSignal) -> Result<Flow, WorkflowError> {
        let request = HistoryRequest {
            range: session.range,
            interval: session.interval,
        };
        let benchmark = self.fetch_benchmark(&request, cancel).await;

        let unit: Arc<dyn AnalysisUnit> = Arc::new(
            MarketAnalysisUnit::new(
                self.ctx.market_data.clone(),
                request,
                self.ctx.config.fetch_retry.clone(),
                self.ctx.config.classifier.clone(),
            )
            .with_benchmark(benchmark),
        );

        let results = self.scheduler.run(&session.instruments, unit, cancel).await;
        if cancel.is_cancelled() {
            return Ok(Flow::Continue);
        }

        let failed = results.iter().filter(|r| r.is_error()).count();
        let candidates: usize = results.iter().map(|r| r.candidates.len()).sum();
        info!(
            session_id = %session.id,
            instruments = results.len(),
            failed,
            candidates,
            "Engine: scan finished, {} candidates",
            candidates
        );

        handlers::record_scan(session, results);
        self.commit(session, SessionState::Analyzing).await?;
        Ok(Flow::Continue)
    }

    async fn fetch_benchmark(&self, request: &HistoryRequest, cancel: &CancelSignal) -> Option<Arc<Vec<Bar>>> {
        let benchmark = self.ctx.config.benchmark.as_ref()?;
        let (outcome, attempts) = fetch_with_retry(
            self.ctx.market_data.as_ref(),
            benchmark,
            request,
            &self.ctx.config.fetch_retry,
            cancel,
        )
        .await;

        match outcome.and_then(|bars| validate_bars(&benchmark.symbol, bars)) {
            Ok(bars) => Some(Arc::new(bars)),
            Err(e) => {
                warn!(
                    benchmark = %benchmark.symbol,
                    attempts,
                    error = %e,
                    "Engine: benchmark unavailable, relative strength disabled"
                );
                None
            }
        }
    }

    async fn assess(&self, session: &mut Session) -> Result<Flow, WorkflowError> {
        handlers::assess_candidates(session, &self.ctx.config.classifier);
        info!(
            session_id = %session.id,
            setups = session.setups.len(),
            discarded = session.discarded.len(),
            "Engine: risk rules applied"
        );
        self.commit(session, SessionState::RiskAssessing).await?;
        Ok(Flow::Continue)
    }

    async fn screen(&self, session: &mut Session, approval: &mut Option<DecisionSlot>) -> Result<Flow, WorkflowError> {
        let timeout = chrono::Duration::from_std(self.ctx.config.approval.timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let deadline = Utc::now() + timeout;

        let passed = handlers::screen_setups(session, self.ctx.config.min_risk_reward, deadline);
        if passed == 0 {
            self.commit(session, SessionState::Completed).await?;
            return Ok(Flow::Continue);
        }

        // Open the slot first so the published pending state always accepts decisions.
        *approval = Some(self.gate.register(&session.id, session.pending_ids()).await);
        self.commit(session, SessionState::PendingApproval).await?;
        Ok(Flow::Continue)
    }

    async fn await_approval(
        &self,
        session: &mut Session,
        slot: Option<DecisionSlot>,
        cancel: &CancelSignal,
    ) -> Result<Flow, WorkflowError> {
        let decision_rx = match slot {
            Some(rx) => rx,
            None => self.gate.register(&session.id, session.pending_ids()).await,
        };
        let deadline = session.approval_deadline.unwrap_or_else(Utc::now);
        self.gate.register_timeout(&session.id, deadline).await;

        info!(
            session_id = %session.id,
            pending = session.pending.len(),
            deadline = %deadline,
            policy = ?self.gate.policy(),
            "Engine: awaiting approval for {} setups",
            session.pending.len()
        );

        let decision = tokio::select! {
            biased;
            decision = decision_rx => decision,
            _ = cancel.cancelled() => {
                self.gate.withdraw(&session.id).await;
                return Ok(Flow::Continue);
            }
        };
        let Ok(decision) = decision else {
            warn!(session_id = %session.id, "Engine: approval slot closed without a decision");
            return Ok(Flow::Suspend);
        };

        handlers::apply_decision(session, decision);
        let next = if session.approved.is_empty() {
            SessionState::Completed
        } else {
            SessionState::Alerting
        };
        self.commit(session, next).await?;
        Ok(Flow::Continue)
    }

    async fn alert(&self, session: &mut Session, cancel: &CancelSignal) -> Result<Flow, WorkflowError> {
        let outstanding = session.undelivered();
        if outstanding.is_empty() && session.rejected_alerts() > 0 {
            // Only alerts the sink refused are left; their failure is already recorded.
            debug!(session_id = %session.id, "Engine: nothing deliverable left");
            return Ok(Flow::Suspend);
        }
        session.delivery_rounds += 1;

        for setup in outstanding {
            if cancel.is_cancelled() {
                break;
            }

            let alert = Alert::for_setup(&session.id, &setup);
            let (outcome, attempts) = self.deliver_with_retry(&alert, cancel).await;

            match &outcome {
                Ok(()) => {
                    if let Some(m) = &self.ctx.metrics {
                        m.alerts_delivered_total.inc();
                    }
                    info!(session_id = %session.id, symbol = %setup.symbol, alert_id = %alert.id, "Engine: alert delivered");
                }
                Err(e) => {
                    if let Some(m) = &self.ctx.metrics {
                        m.alerts_failed_total.inc();
                    }
                    warn!(session_id = %session.id, symbol = %setup.symbol, attempts, error = %e, "Engine: alert not delivered");
                }
            }

            let rejected = matches!(outcome, Err(NotificationError::Rejected(_)));
            handlers::record_delivery(
                session,
                DeliveryRecord {
                    alert_id: alert.id,
                    setup_id: setup.id.clone(),
                    delivered: outcome.is_ok(),
                    rejected,
                    attempts,
                    error: outcome.err().map(|e| e.to_string()),
                    attempted_at: Utc::now(),
                },
            );
        }

        if cancel.is_cancelled() {
            return Ok(Flow::Continue);
        }

        let undelivered = session.undelivered().len();
        let rejected = session.rejected_alerts();
        if undelivered == 0 && rejected == 0 {
            session.delivery_failure = None;
            session.reason = Some(format!("{} alert(s) delivered", session.approved.len()));
            self.commit(session, SessionState::Completed).await?;
            return Ok(Flow::Continue);
        }

        let mut failure = format!(
            "{} of {} alerts undelivered after delivery round {}",
            undelivered + rejected,
            session.approved.len(),
            session.delivery_rounds
        );
        if rejected > 0 {
            failure.push_str(&format!(", {} rejected by the sink and not retried", rejected));
        }
        session.delivery_failure = Some(failure);
        self.checkpoint(session).await?;
        warn!(
            session_id = %session.id,
            undelivered,
            rejected,
            "Engine: delivery incomplete, session left in alerting"
        );
        Ok(Flow::Suspend)
    }

    async fn deliver_with_retry(&self, alert: &Alert, cancel: &CancelSignal) -> (Result<(), NotificationError>, u32) {
        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let notifier = self.ctx.notifier.as_ref();

        let deliver = (move || async move {
            attempts_ref.fetch_add(1, Ordering::SeqCst);
            notifier.deliver(alert).await
        })
        .retry(self.ctx.config.notify_retry.backoff())
        .sleep(tokio::time::sleep)
        .when(|e: &NotificationError| e.is_retryable())
        .notify(|e: &NotificationError, delay| {
            warn!(
                alert_id = %alert.id,
                error = %e,
                retry_in_ms = delay.as_millis() as u64,
                "Engine: delivery failed, retrying"
            );
        });

        let outcome = tokio::select! {
            result = deliver => result,
            _ = cancel.cancelled() => Err(NotificationError::Unreachable("delivery cancelled".to_string())),
        };
        (outcome, attempts.load(Ordering::SeqCst))
    }

    /// Move to `next` and checkpoint. Illegal transitions are refused.
    async fn commit(&self, session: &mut Session, next: SessionState) -> Result<(), WorkflowError> {
        let from = session.state;
        if !from.can_transition_to(next) {
            return Err(WorkflowError::IllegalTransition { from, to: next });
        }

        session.state = next;
        self.checkpoint(session).await?;
        info!(session_id = %session.id, from = %from, to = %next, "Engine: {} -> {}", from, next);
        Ok(())
    }

    /// Persist the session as it stands, then publish it. A failed write
    /// fails the session.
    async fn checkpoint(&self, session: &mut Session) -> Result<(), WorkflowError> {
        session.updated_at = Utc::now();
        session.revision += 1;

        match self.ctx.store.save(&Checkpoint::of(session)).await {
            Ok(()) => {
                if let Some(m) = &self.ctx.metrics {
                    m.checkpoint_writes_total.inc();
                }
                self.publish(session).await;
                Ok(())
            }
            Err(e) => {
                if let Some(m) = &self.ctx.metrics {
                    m.checkpoint_failures_total.inc();
                }
                error!(session_id = %session.id, state = %session.state, error = %e, "Engine: checkpoint write failed");
                self.fail(session, format!("checkpoint write failed: {}", e)).await;
                Err(e.into())
            }
        }
    }

    async fn fail(&self, session: &mut Session, reason: String) {
        session.state = SessionState::Failed;
        session.reason = Some(reason);
        session.updated_at = Utc::now();
        session.revision += 1;

        if let Err(e) = self.ctx.store.save(&Checkpoint::of(session)).await {
            warn!(session_id = %session.id, error = %e, "Engine: failed state could not be persisted");
        }
        self.publish(session).await;
    }

    async fn publish(&self, session: &Session) {
        let mut sessions = self.sessions.write().await;

        if !session.state.is_terminal() {
            if let Some(handle) = sessions.get_mut(&session.id) {
                handle.snapshot = session.clone();
            }
            return;
        }

        let was_active = sessions.remove(&session.id).is_some();
        drop(sessions);
        // Archived sessions answer stale decisions from their checkpoint.
        self.gate.forget(&session.id).await;

        if let Some(m) = &self.ctx.metrics {
            if was_active {
                m.sessions_active.dec();
            }
            m.sessions_terminal_total
                .with_label_values(&[session.state.as_str()])
                .inc();
        }
        info!(
            session_id = %session.id,
            state = %session.state,
            reason = session.reason.as_deref().unwrap_or(""),
            "Engine: session archived"
        );
    }

    async fn load(&self, session_id: &str) -> Result<Checkpoint, WorkflowError> {
        self.ctx.store.load(session_id).await.map_err(|e| match e {
            StoreError::NotFound(id) => WorkflowError::SessionNotFound(id),
            other => WorkflowError::Store(other),
        })
    }
}
