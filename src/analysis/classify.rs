//! Setup classification
//!
//! Pure mapping from an instrument's recent daily bars (plus optional
//! benchmark bars) to zero or more setup candidates. The last bar is the
//! current day, the one before it the prior day. Shapes that match no kind,
//! or too little history, simply produce nothing.

use serde::{Deserialize, Serialize};

use crate::indicators::{
    calculate_atr, calculate_averages, calculate_support_resistance, range_band,
    real_relative_strength, relative_strength_profile, trend_alignment, DEFAULT_EMA_PERIODS,
    DEFAULT_RRS_PERIODS, DEFAULT_SMA_PERIODS,
};
use crate::models::{Bar, Direction, SetupCandidate, SetupEvidence, SetupKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Max current range as a fraction of the prior range for a reversal
    pub narrow_range_ratio: f64,
    /// Minimum gap beyond the prior high/low, in percent
    pub gap_threshold_pct: f64,
    /// Minimum |RRS| confirming a trend continuation
    pub rs_threshold: f64,
    /// Bars over which the confirming RRS is measured
    pub rs_period: usize,
    /// Periods reported as RRS evidence
    pub rs_periods: Vec<usize>,
    pub sma_periods: Vec<usize>,
    pub ema_periods: Vec<usize>,
    /// Weight of moving-average alignment on confidence: a setup trading with
    /// every average gains this fraction, one against all of them loses it
    pub alignment_weight: f64,
    pub atr_period: usize,
    pub trend_target_atr_multiple: f64,
    /// Bars before the current one forming the range band
    pub range_lookback: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            narrow_range_ratio: 0.5,
            gap_threshold_pct: 1.0,
            rs_threshold: 1.0,
            rs_period: 1,
            rs_periods: DEFAULT_RRS_PERIODS.to_vec(),
            sma_periods: DEFAULT_SMA_PERIODS.to_vec(),
            ema_periods: DEFAULT_EMA_PERIODS.to_vec(),
            alignment_weight: 0.25,
            atr_period: 14,
            trend_target_atr_multiple: 2.0,
            range_lookback: 10,
        }
    }
}

/// Classify the last bar of `bars` (sorted by date, oldest first)
pub fn classify(
    symbol: &str,
    bars: &[Bar],
    benchmark: Option<&[Bar]>,
    config: &ClassifierConfig,
) -> Vec<SetupCandidate> {
    if bars.len() < 2 {
        return Vec::new();
    }

    let evidence = build_evidence(bars, benchmark, config);
    let candidate = |kind: SetupKind, direction: Direction, confidence: f64| SetupCandidate {
        kind,
        symbol: symbol.to_string(),
        direction,
        evidence: evidence.clone(),
        confidence: weigh_alignment(confidence, direction, evidence.trend_alignment, config)
            .clamp(0.0, 1.0),
    };

    let mut candidates = Vec::new();
    if let Some((direction, confidence)) = detect_gap(&evidence, config) {
        candidates.push(candidate(SetupKind::GapPlay, direction, confidence));
    }
    if let Some((direction, confidence)) = detect_trend_continuation(&evidence, config) {
        candidates.push(candidate(SetupKind::TrendContinuation, direction, confidence));
    }
    if let Some((direction, confidence)) = detect_range_break(&evidence) {
        candidates.push(candidate(SetupKind::RangeBreak, direction, confidence));
    }
    if let Some((direction, confidence)) = detect_reversal(&evidence, config) {
        candidates.push(candidate(SetupKind::ReversalPattern, direction, confidence));
    }
    candidates
}

fn build_evidence(bars: &[Bar], benchmark: Option<&[Bar]>, config: &ClassifierConfig) -> SetupEvidence {
    let current = bars[bars.len() - 1];
    let prior = bars[bars.len() - 2];
    let history = &bars[..bars.len() - 1];

    let levels = calculate_support_resistance(history, config.range_lookback);
    let band = range_band(history, config.range_lookback);
    let averages = calculate_averages(bars, &config.sma_periods, &config.ema_periods);

    SetupEvidence {
        prior_open: prior.open,
        prior_high: prior.high,
        prior_low: prior.low,
        prior_close: prior.close,
        current_open: current.open,
        current_high: current.high,
        current_low: current.low,
        last_price: current.close,
        support: levels.map(|l| l.support),
        resistance: levels.map(|l| l.resistance),
        range_low: band.map(|b| b.low),
        range_high: band.map(|b| b.high),
        atr: calculate_atr(bars, config.atr_period),
        relative_strength: benchmark
            .and_then(|bench| real_relative_strength(bars, bench, config.rs_period)),
        relative_strength_periods: benchmark
            .map(|bench| relative_strength_profile(bars, bench, &config.rs_periods))
            .unwrap_or_default(),
        trend_alignment: trend_alignment(current.close, &averages),
        moving_averages: averages,
    }
}

/// Scale `confidence` by how well `direction` agrees with the moving averages.
/// Without enough history for any average it is left as is.
fn weigh_alignment(
    confidence: f64,
    direction: Direction,
    alignment: Option<f64>,
    config: &ClassifierConfig,
) -> f64 {
    let Some(alignment) = alignment else {
        return confidence;
    };
    let agreement = match direction {
        Direction::Long => alignment,
        Direction::Short => -alignment,
    };
    confidence * (1.0 + config.alignment_weight * agreement)
}

fn detect_gap(ev: &SetupEvidence, config: &ClassifierConfig) -> Option<(Direction, f64)> {
    let threshold = config.gap_threshold_pct / 100.0;
    let scale = |gap_pct: f64| gap_pct / (3.0 * config.gap_threshold_pct.max(f64::EPSILON));

    if ev.current_open > ev.prior_high * (1.0 + threshold) {
        let gap_pct = (ev.current_open - ev.prior_high) / ev.prior_high * 100.0;
        return Some((Direction::Long, scale(gap_pct)));
    }
    if ev.current_open < ev.prior_low * (1.0 - threshold) {
        let gap_pct = (ev.prior_low - ev.current_open) / ev.prior_low * 100.0;
        return Some((Direction::Short, scale(gap_pct)));
    }
    None
}

fn detect_trend_continuation(ev: &SetupEvidence, config: &ClassifierConfig) -> Option<(Direction, f64)> {
    let rs = ev.relative_strength?;
    let confidence = rs.abs() / (3.0 * config.rs_threshold.max(f64::EPSILON));

    if ev.last_price > ev.prior_high && rs >= config.rs_threshold {
        return Some((Direction::Long, confidence));
    }
    if ev.last_price < ev.prior_low && rs <= -config.rs_threshold {
        return Some((Direction::Short, confidence));
    }
    None
}

fn detect_range_break(ev: &SetupEvidence) -> Option<(Direction, f64)> {
    let (low, high) = (ev.range_low?, ev.range_high?);
    let prior_range = ev.prior_range();
    let current_range = ev.current_range();
    if current_range <= prior_range {
        return None;
    }

    let confidence = if prior_range > 0.0 {
        current_range / prior_range - 1.0
    } else {
        1.0
    };

    if ev.last_price > high {
        Some((Direction::Long, confidence))
    } else if ev.last_price < low {
        Some((Direction::Short, confidence))
    } else {
        None
    }
}

fn detect_reversal(ev: &SetupEvidence, config: &ClassifierConfig) -> Option<(Direction, f64)> {
    let prior_range = ev.prior_range();
    if prior_range <= 0.0 {
        return None;
    }

    let inside = ev.current_high <= ev.prior_high && ev.current_low >= ev.prior_low;
    let narrow = ev.current_range() <= config.narrow_range_ratio * prior_range;
    if !(inside && narrow) {
        return None;
    }

    // A down day reverses long, an up day short. A doji defers to where the
    // current close sits in the prior range.
    let direction = if ev.prior_close < ev.prior_open {
        Direction::Long
    } else if ev.prior_close > ev.prior_open {
        Direction::Short
    } else if ev.last_price <= (ev.prior_high + ev.prior_low) / 2.0 {
        Direction::Long
    } else {
        Direction::Short
    };

    Some((direction, 1.0 - ev.current_range() / prior_range))
}
