//! Approval gate
//!
//! Registry of sessions waiting on a decision, each holding a one-shot slot.
//! A slot is resolved exactly once, either by `submit_decision` or by its
//! timeout task, and both paths hand the engine the same `ApprovalDecision`.
//! Later decisions for a resolved session are stale. The gate only remembers
//! resolutions until the session is archived; `forget` drops them.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{ApprovalDecision, DecisionRequest, DecisionSource, SessionId, TimeoutPolicy};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("stale decision: session {0} has already been resolved")]
    StaleDecision(String),
    #[error("session {0} is not awaiting approval")]
    NotPending(String),
    #[error("invalid decision: {0}")]
    InvalidDecision(String),
}

struct Slot {
    tx: oneshot::Sender<ApprovalDecision>,
    pending: Vec<String>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct ApprovalGate {
    // Lock order: slots, then resolved.
    slots: Arc<Mutex<HashMap<SessionId, Slot>>>,
    resolved: Arc<Mutex<HashSet<SessionId>>>,
    policy: TimeoutPolicy,
}

impl ApprovalGate {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            resolved: Arc::new(Mutex::new(HashSet::new())),
            policy,
        }
    }

    pub fn policy(&self) -> TimeoutPolicy {
        self.policy
    }

    /// Open a slot for `session_id` over the given pending setup ids.
    ///
    /// Replaces any slot left from an earlier registration of the same session.
    pub async fn register(
        &self,
        session_id: &str,
        pending: Vec<String>,
    ) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().await;

        if let Some(old) = slots.remove(session_id) {
            if let Some(timer) = old.timer {
                timer.abort();
            }
        }
        self.resolved.lock().await.remove(session_id);

        debug!(session_id = %session_id, pending = pending.len(), "ApprovalGate: slot opened");
        slots.insert(
            session_id.to_string(),
            Slot {
                tx,
                pending,
                timer: None,
            },
        );
        rx
    }

    /// Resolve the slot with the default policy once `deadline` passes.
    /// A deadline already in the past resolves immediately.
    pub async fn register_timeout(&self, session_id: &str, deadline: DateTime<Utc>) {
        let wait = (deadline - Utc::now()).to_std().unwrap_or_default();
        let gate = self.clone();
        let id = session_id.to_string();

        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.get_mut(session_id) else {
            warn!(session_id = %session_id, "ApprovalGate: timeout for unknown slot ignored");
            return;
        };

        let timer = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            gate.expire(&id).await;
        });
        if let Some(previous) = slot.timer.replace(timer) {
            previous.abort();
        }
    }

    /// Deliver a human decision. The first resolution wins.
    pub async fn submit_decision(
        &self,
        session_id: &str,
        request: DecisionRequest,
    ) -> Result<ApprovalDecision, ApprovalError> {
        let mut slots = self.slots.lock().await;

        let decision = match slots.get(session_id) {
            Some(slot) => build_decision(session_id, &slot.pending, request)?,
            None => return Err(self.missing(session_id).await),
        };
        let Some(slot) = slots.remove(session_id) else {
            return Err(self.missing(session_id).await);
        };
        if let Some(timer) = slot.timer {
            timer.abort();
        }
        self.resolved.lock().await.insert(session_id.to_string());

        if slot.tx.send(decision.clone()).is_err() {
            // Nobody is waiting any more; the session moved on without us.
            return Err(ApprovalError::StaleDecision(session_id.to_string()));
        }

        info!(
            session_id = %session_id,
            approved = decision.approved.len(),
            rejected = decision.rejected.len(),
            "ApprovalGate: decision accepted"
        );
        Ok(decision)
    }

    /// Close the slot without a decision, e.g. on cancellation
    pub async fn withdraw(&self, session_id: &str) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.remove(session_id) {
            if let Some(timer) = slot.timer {
                timer.abort();
            }
            self.resolved.lock().await.insert(session_id.to_string());
            debug!(session_id = %session_id, "ApprovalGate: slot withdrawn");
        }
    }

    /// Drop everything held for `session_id`, open slot and resolution alike
    pub async fn forget(&self, session_id: &str) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.remove(session_id) {
            if let Some(timer) = slot.timer {
                timer.abort();
            }
        }
        self.resolved.lock().await.remove(session_id);
    }

    pub async fn is_pending(&self, session_id: &str) -> bool {
        self.slots.lock().await.contains_key(session_id)
    }

    pub async fn is_resolved(&self, session_id: &str) -> bool {
        self.resolved.lock().await.contains(session_id)
    }

    async fn expire(&self, session_id: &str) {
        let mut slots = self.slots.lock().await;
        // Already resolved by a human: nothing to do.
        let Some(slot) = slots.remove(session_id) else {
            return;
        };
        self.resolved.lock().await.insert(session_id.to_string());

        let decision = ApprovalDecision::timeout_default(session_id, &slot.pending, self.policy);
        info!(
            session_id = %session_id,
            policy = ?self.policy,
            "ApprovalGate: approval timed out"
        );
        let _ = slot.tx.send(decision);
    }

    async fn missing(&self, session_id: &str) -> ApprovalError {
        if self.resolved.lock().await.contains(session_id) {
            ApprovalError::StaleDecision(session_id.to_string())
        } else {
            ApprovalError::NotPending(session_id.to_string())
        }
    }
}

/// Validate a request against the pending ids. Pending ids named in neither
/// list count as rejected.
fn build_decision(
    session_id: &str,
    pending: &[String],
    request: DecisionRequest,
) -> Result<ApprovalDecision, ApprovalError> {
    let unknown: Vec<&String> = request
        .approve
        .iter()
        .chain(request.reject.iter())
        .filter(|id| !pending.contains(id))
        .collect();
    if !unknown.is_empty() {
        return Err(ApprovalError::InvalidDecision(format!(
            "setup ids not pending: {:?}",
            unknown
        )));
    }

    if let Some(both) = request.approve.iter().find(|id| request.reject.contains(id)) {
        return Err(ApprovalError::InvalidDecision(format!(
            "setup {} both approved and rejected",
            both
        )));
    }

    let (approved, rejected): (Vec<String>, Vec<String>) = pending
        .iter()
        .cloned()
        .partition(|id| request.approve.contains(id));

    Ok(ApprovalDecision {
        session_id: session_id.to_string(),
        approved,
        rejected,
        source: DecisionSource::Human,
        note: request.note,
        decided_at: Utc::now(),
    })
}
