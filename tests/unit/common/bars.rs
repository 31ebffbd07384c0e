//! Bar builders shared by the unit tests

#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use setupflow::models::Bar;

pub fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + Duration::days(offset)
}

pub fn bar(offset: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar::new(day(offset), open, high, low, close, 1_000_000)
}

/// `count` bars with a 1.0 range whose midpoint moves by `step` per day.
/// `step` must stay within [-1, 1] to keep the bars well formed.
pub fn drifting_bars(count: usize, start: f64, step: f64) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let mid = start + step * i as f64;
            bar(i as i64, mid, mid + 0.5, mid - 0.5, mid + step * 0.5)
        })
        .collect()
}

/// Prior range 2.00, current range 0.30 inside it, prior day down
pub fn aaa_reversal() -> Vec<Bar> {
    vec![
        bar(0, 101.8, 102.0, 100.0, 100.2),
        bar(1, 101.0, 101.2, 100.9, 101.0),
    ]
}
