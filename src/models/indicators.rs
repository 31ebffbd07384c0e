//! Indicator readings carried as setup evidence

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AverageKind {
    Sma,
    Ema,
}

/// Moving average of closes over `period` bars
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovingAverage {
    pub kind: AverageKind,
    pub period: usize,
    pub value: f64,
}

/// Real relative strength against the benchmark over `period` bars
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeStrengthReading {
    pub period: usize,
    pub value: f64,
}
