//! Per-instrument analysis outcome

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::market::Instrument;
use crate::models::setup::SetupCandidate;

/// Produced by exactly one analysis unit invocation and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub instrument: Instrument,
    #[serde(default)]
    pub candidates: Vec<SetupCandidate>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub attempts: u32,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn completed(instrument: Instrument, candidates: Vec<SetupCandidate>, attempts: u32) -> Self {
        Self {
            instrument,
            candidates,
            error: None,
            attempts,
            analyzed_at: Utc::now(),
        }
    }

    pub fn failed(instrument: Instrument, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            instrument,
            candidates: Vec::new(),
            error: Some(error.into()),
            attempts,
            analyzed_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
