//! Alerts emitted for approved setups

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::setup::{Direction, Setup, SetupKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Low,
    Medium,
    High,
}

impl AlertLevel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.75 {
            AlertLevel::High
        } else if confidence >= 0.5 {
            AlertLevel::Medium
        } else {
            AlertLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub session_id: String,
    pub setup_id: String,
    pub symbol: String,
    pub kind: SetupKind,
    pub direction: Direction,
    pub level: AlertLevel,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub risk_reward: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// The id is derived from the setup, so a redelivered alert keeps its id
    /// and sinks can deduplicate.
    pub fn for_setup(session_id: &str, setup: &Setup) -> Self {
        let id = Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("alert:{}:{}", session_id, setup.id).as_bytes(),
        )
        .to_string();
        let message = format!(
            "{} {} {}: entry {:.2}, stop {:.2}, target {:.2} (R/R {:.2})",
            setup.symbol,
            setup.kind,
            setup.direction,
            setup.entry,
            setup.stop,
            setup.target,
            setup.risk_reward
        );

        Self {
            id,
            session_id: session_id.to_string(),
            setup_id: setup.id.clone(),
            symbol: setup.symbol.clone(),
            kind: setup.kind,
            direction: setup.direction,
            level: AlertLevel::from_confidence(setup.confidence),
            entry: setup.entry,
            stop: setup.stop,
            target: setup.target,
            risk_reward: setup.risk_reward,
            message,
            created_at: Utc::now(),
        }
    }
}

/// Delivery outcome for one alert, replaced on every delivery round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub alert_id: String,
    pub setup_id: String,
    pub delivered: bool,
    /// The sink refused the alert; it is never sent again
    #[serde(default)]
    pub rejected: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}
