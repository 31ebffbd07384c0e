//! ATR (Average True Range) indicator

use crate::indicators::math;
use crate::models::Bar;

pub const DEFAULT_ATR_PERIOD: usize = 14;

/// True range series, one value per bar
pub fn true_ranges(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let prev_close = i.checked_sub(1).map(|p| bars[p].close);
            math::true_range(bar.high, bar.low, prev_close)
        })
        .collect()
}

/// Calculate ATR using Wilder's smoothing
///
/// Returns `None` when there are fewer bars than `period`.
pub fn calculate_atr(bars: &[Bar], period: usize) -> Option<f64> {
    math::wilders_average(&true_ranges(bars), period)
}

/// Calculate ATR with default period (14)
pub fn calculate_atr_default(bars: &[Bar]) -> Option<f64> {
    calculate_atr(bars, DEFAULT_ATR_PERIOD)
}
