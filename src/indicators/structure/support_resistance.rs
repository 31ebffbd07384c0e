//! Support and Resistance levels detection

use serde::{Deserialize, Serialize};

use crate::models::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupportResistance {
    pub support: f64,
    pub resistance: f64,
}

/// Lowest low and highest high of a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeBand {
    pub low: f64,
    pub high: f64,
}

impl RangeBand {
    pub fn height(&self) -> f64 {
        self.high - self.low
    }
}

/// Calculate support and resistance levels over the last `lookback` bars
///
/// Uses the lower/upper third of the window's lows and highs rather than the
/// extremes, so a single wick does not define the level.
pub fn calculate_support_resistance(bars: &[Bar], lookback: usize) -> Option<SupportResistance> {
    if lookback == 0 || bars.len() < lookback {
        return None;
    }

    let window = &bars[bars.len() - lookback..];
    let mut lows: Vec<f64> = window.iter().map(|b| b.low).collect();
    let mut highs: Vec<f64> = window.iter().map(|b| b.high).collect();

    lows.sort_by(|a, b| a.total_cmp(b));
    highs.sort_by(|a, b| b.total_cmp(a));

    let support = if lows.len() >= 3 { lows[lows.len() / 3] } else { lows[0] };
    let resistance = if highs.len() >= 3 { highs[highs.len() / 3] } else { highs[0] };

    Some(SupportResistance { support, resistance })
}

/// Extremes of the last `lookback` bars
pub fn range_band(bars: &[Bar], lookback: usize) -> Option<RangeBand> {
    if lookback == 0 || bars.len() < lookback {
        return None;
    }

    let window = &bars[bars.len() - lookback..];
    let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    Some(RangeBand { low, high })
}
