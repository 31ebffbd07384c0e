//! Detected trading setups
//!
//! A `SetupCandidate` is what classification finds: a kind, a direction and
//! the price action behind it. The kind's risk rule prices it into a `Setup`
//! with entry, stop, target and risk/reward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::indicators::{MovingAverage, RelativeStrengthReading};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetupKind {
    GapPlay,
    TrendContinuation,
    RangeBreak,
    ReversalPattern,
}

impl SetupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupKind::GapPlay => "gap-play",
            SetupKind::TrendContinuation => "trend-continuation",
            SetupKind::RangeBreak => "range-break",
            SetupKind::ReversalPattern => "reversal-pattern",
        }
    }
}

impl fmt::Display for SetupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => f.write_str("long"),
            Direction::Short => f.write_str("short"),
        }
    }
}

/// Price action a setup was detected from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupEvidence {
    pub prior_open: f64,
    pub prior_high: f64,
    pub prior_low: f64,
    pub prior_close: f64,
    pub current_open: f64,
    pub current_high: f64,
    pub current_low: f64,
    pub last_price: f64,
    /// Lookback support/resistance levels
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub support: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resistance: Option<f64>,
    /// Extremes of the lookback window, excluding the current bar
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub range_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub range_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub atr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relative_strength: Option<f64>,
    /// RRS over each configured period the history covers
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub relative_strength_periods: Vec<RelativeStrengthReading>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub moving_averages: Vec<MovingAverage>,
    /// Net share of moving averages the last price is above, in [-1, 1]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trend_alignment: Option<f64>,
}

impl SetupEvidence {
    pub fn prior_range(&self) -> f64 {
        self.prior_high - self.prior_low
    }

    pub fn current_range(&self) -> f64 {
        self.current_high - self.current_low
    }
}

/// A classified but not yet priced opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupCandidate {
    pub kind: SetupKind,
    pub symbol: String,
    pub direction: Direction,
    pub evidence: SetupEvidence,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    pub id: String,
    pub kind: SetupKind,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub risk_reward: f64,
    pub confidence: f64,
    pub evidence: SetupEvidence,
    pub detected_at: DateTime<Utc>,
}

impl Setup {
    /// Stable id for a setup within a session, so re-running a stage after a
    /// resume yields the same ids.
    pub fn derive_id(session_id: &str, symbol: &str, kind: SetupKind, direction: Direction) -> String {
        let name = format!("{}:{}:{}:{}", session_id, symbol, kind, direction);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    pub fn risk(&self) -> f64 {
        (self.entry - self.stop).abs()
    }

    pub fn reward(&self) -> f64 {
        (self.target - self.entry).abs()
    }
}

/// A candidate or setup that was dropped, with the reason why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardedSetup {
    pub kind: SetupKind,
    pub symbol: String,
    pub direction: Direction,
    /// Present when the setup was priced but failed the threshold
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub setup: Option<Setup>,
    pub reason: String,
}

impl DiscardedSetup {
    pub fn unpriced(candidate: &SetupCandidate, reason: impl Into<String>) -> Self {
        Self {
            kind: candidate.kind,
            symbol: candidate.symbol.clone(),
            direction: candidate.direction,
            setup: None,
            reason: reason.into(),
        }
    }

    pub fn below_threshold(setup: &Setup, reason: impl Into<String>) -> Self {
        Self {
            kind: setup.kind,
            symbol: setup.symbol.clone(),
            direction: setup.direction,
            setup: Some(setup.clone()),
            reason: reason.into(),
        }
    }
}
