//! Moving averages of closes

use crate::indicators::math;
use crate::models::{AverageKind, Bar, MovingAverage};

pub const DEFAULT_SMA_PERIODS: [usize; 3] = [50, 100, 200];
pub const DEFAULT_EMA_PERIODS: [usize; 2] = [8, 15];

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// Calculate SMA over the last `period` closes
pub fn calculate_sma(bars: &[Bar], period: usize) -> Option<MovingAverage> {
    if period == 0 || bars.len() < period {
        return None;
    }

    let closes = closes(&bars[bars.len() - period..]);
    Some(MovingAverage {
        kind: AverageKind::Sma,
        period,
        value: math::round2(math::mean(&closes)?),
    })
}

/// Calculate EMA for a specific period over the whole series
pub fn calculate_ema(bars: &[Bar], period: usize) -> Option<MovingAverage> {
    let value = math::ema(&closes(bars), period)?;
    Some(MovingAverage {
        kind: AverageKind::Ema,
        period,
        value: math::round2(value),
    })
}

/// Every average the history is long enough for, SMAs first
pub fn calculate_averages(bars: &[Bar], sma_periods: &[usize], ema_periods: &[usize]) -> Vec<MovingAverage> {
    let smas = sma_periods.iter().filter_map(|&p| calculate_sma(bars, p));
    let emas = ema_periods.iter().filter_map(|&p| calculate_ema(bars, p));
    smas.chain(emas).collect()
}

/// Net share of averages `price` sits above, from -1 (below all) to 1
/// (above all). `None` without any average.
pub fn trend_alignment(price: f64, averages: &[MovingAverage]) -> Option<f64> {
    if averages.is_empty() {
        return None;
    }

    let net: f64 = averages
        .iter()
        .map(|ma| {
            if price > ma.value {
                1.0
            } else if price < ma.value {
                -1.0
            } else {
                0.0
            }
        })
        .sum();
    Some(net / averages.len() as f64)
}
