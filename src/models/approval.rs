//! Approval decisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Human,
    TimeoutDefault,
}

/// What happens to pending setups when nobody decides in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    #[default]
    Reject,
    Approve,
}

impl std::str::FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(TimeoutPolicy::Reject),
            "approve" => Ok(TimeoutPolicy::Approve),
            other => Err(format!("unknown timeout policy '{}'", other)),
        }
    }
}

/// Operator input for one approval cycle. Pending ids named in neither list
/// are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub approve: Vec<String>,
    #[serde(default)]
    pub reject: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub note: Option<String>,
}

impl DecisionRequest {
    pub fn approve(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            approve: ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn reject_all() -> Self {
        Self::default()
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Resolution of one approval cycle, from a human or the timeout default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub session_id: String,
    pub approved: Vec<String>,
    pub rejected: Vec<String>,
    pub source: DecisionSource,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub note: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn timeout_default(session_id: &str, pending: &[String], policy: TimeoutPolicy) -> Self {
        let (approved, rejected) = match policy {
            TimeoutPolicy::Approve => (pending.to_vec(), Vec::new()),
            TimeoutPolicy::Reject => (Vec::new(), pending.to_vec()),
        };
        Self {
            session_id: session_id.to_string(),
            approved,
            rejected,
            source: DecisionSource::TimeoutDefault,
            note: Some(format!("approval timed out; default policy {:?}", policy).to_lowercase()),
            decided_at: Utc::now(),
        }
    }
}
