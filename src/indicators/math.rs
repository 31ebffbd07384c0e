//! Shared numeric helpers

/// True range of a bar against the previous close.
///
/// Without a previous close this is the bar's own high-low range.
pub fn true_range(high: f64, low: f64, prev_close: Option<f64>) -> f64 {
    let hl = high - low;
    match prev_close {
        Some(prev) => hl.max((high - prev).abs()).max((low - prev).abs()),
        None => hl,
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Wilder's smoothed average: seeded with the mean of the first `period`
/// values, then smoothed with alpha = 1/period over the rest.
pub fn wilders_average(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let alpha = 1.0 / period as f64;
    let seed = mean(&values[..period])?;
    Some(
        values[period..]
            .iter()
            .fold(seed, |avg, v| alpha * v + (1.0 - alpha) * avg),
    )
}

/// Round to cents, the precision prices are quoted at
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// EMA seeded with the first value, alpha = 2/(period+1)
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let (first, rest) = values.split_first()?;
    Some(rest.iter().fold(*first, |avg, v| alpha * v + (1.0 - alpha) * avg))
}
