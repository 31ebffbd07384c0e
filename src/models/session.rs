//! Workflow sessions and their state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::alert::DeliveryRecord;
use crate::models::analysis::AnalysisResult;
use crate::models::approval::ApprovalDecision;
use crate::models::market::{DateRange, Instrument, Interval};
use crate::models::setup::{DiscardedSetup, Setup};

pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Scanning,
    Analyzing,
    RiskAssessing,
    PendingApproval,
    Alerting,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }

    /// Whether the session has already left the approval stage
    pub fn is_past_approval(&self) -> bool {
        self.is_terminal() || matches!(self, SessionState::Alerting)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Scanning)
                | (Scanning, Analyzing)
                | (Analyzing, RiskAssessing)
                | (RiskAssessing, PendingApproval)
                | (RiskAssessing, Completed)
                | (PendingApproval, Alerting)
                | (PendingApproval, Completed)
                | (Alerting, Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Analyzing => "analyzing",
            SessionState::RiskAssessing => "risk_assessing",
            SessionState::PendingApproval => "pending_approval",
            SessionState::Alerting => "alerting",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One workflow run and its full audit trail.
///
/// `revision` increases by one on every committed checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub instruments: Vec<Instrument>,
    pub range: DateRange,
    pub interval: Interval,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: u64,
    #[serde(default)]
    pub results: Vec<AnalysisResult>,
    /// Priced setups, before the threshold
    #[serde(default)]
    pub setups: Vec<Setup>,
    #[serde(default)]
    pub pending: Vec<Setup>,
    #[serde(default)]
    pub discarded: Vec<DiscardedSetup>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub approval_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decisions: Vec<ApprovalDecision>,
    #[serde(default)]
    pub approved: Vec<Setup>,
    #[serde(default)]
    pub deliveries: Vec<DeliveryRecord>,
    #[serde(default)]
    pub delivery_rounds: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub delivery_failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

impl Session {
    /// New idle session. Instruments are deduplicated by symbol and sorted.
    pub fn new(instruments: Vec<Instrument>, range: DateRange, interval: Interval) -> Self {
        let mut instruments = instruments;
        instruments.sort();
        instruments.dedup_by(|a, b| a.symbol == b.symbol);
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            instruments,
            range,
            interval,
            state: SessionState::Idle,
            created_at: now,
            updated_at: now,
            revision: 0,
            results: Vec::new(),
            setups: Vec::new(),
            pending: Vec::new(),
            discarded: Vec::new(),
            approval_deadline: None,
            decisions: Vec::new(),
            approved: Vec::new(),
            deliveries: Vec::new(),
            delivery_rounds: 0,
            delivery_failure: None,
            reason: None,
        }
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.iter().map(|s| s.id.clone()).collect()
    }

    pub fn is_delivered(&self, setup_id: &str) -> bool {
        self.deliveries
            .iter()
            .any(|d| d.setup_id == setup_id && d.delivered)
    }

    pub fn is_rejected(&self, setup_id: &str) -> bool {
        self.deliveries
            .iter()
            .any(|d| d.setup_id == setup_id && d.rejected)
    }

    /// Approved setups still to be delivered: not yet acknowledged and not
    /// refused by the sink
    pub fn undelivered(&self) -> Vec<Setup> {
        self.approved
            .iter()
            .filter(|s| !self.is_delivered(&s.id) && !self.is_rejected(&s.id))
            .cloned()
            .collect()
    }

    /// Approved setups whose alert the sink refused
    pub fn rejected_alerts(&self) -> usize {
        self.approved.iter().filter(|s| self.is_rejected(&s.id)).count()
    }

    pub fn failed_instruments(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }
}
