//! Per-kind risk rules
//!
//! Every candidate is routed by its kind to the rule that knows how to price
//! it. A rule yields entry, stop and target; risk/reward follows from those.

use chrono::{DateTime, Utc};

use crate::analysis::classify::ClassifierConfig;
use crate::models::{Direction, DiscardedSetup, Setup, SetupCandidate, SetupEvidence, SetupKind};

/// Entry, stop and target proposed by a risk rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
}

/// Route a candidate to its kind's risk rule and price it.
///
/// `Err` carries the reason the candidate could not be priced.
pub fn assess(
    candidate: &SetupCandidate,
    session_id: &str,
    config: &ClassifierConfig,
    detected_at: DateTime<Utc>,
) -> Result<Setup, String> {
    let levels = match candidate.kind {
        SetupKind::GapPlay => gap_play_levels(candidate.direction, &candidate.evidence),
        SetupKind::TrendContinuation => trend_continuation_levels(
            candidate.direction,
            &candidate.evidence,
            config.trend_target_atr_multiple,
        ),
        SetupKind::RangeBreak => range_break_levels(candidate.direction, &candidate.evidence),
        SetupKind::ReversalPattern => reversal_levels(candidate.direction, &candidate.evidence),
    }?;

    let risk_reward = risk_reward(candidate.direction, &levels).ok_or_else(|| {
        format!(
            "{} levels inconsistent for {}: entry {:.2}, stop {:.2}, target {:.2}",
            candidate.kind, candidate.direction, levels.entry, levels.stop, levels.target
        )
    })?;

    Ok(Setup {
        id: Setup::derive_id(session_id, &candidate.symbol, candidate.kind, candidate.direction),
        kind: candidate.kind,
        symbol: candidate.symbol.clone(),
        direction: candidate.direction,
        entry: levels.entry,
        stop: levels.stop,
        target: levels.target,
        risk_reward,
        confidence: candidate.confidence,
        evidence: candidate.evidence.clone(),
        detected_at,
    })
}

/// Reward over risk, or `None` when stop and target are not on opposite
/// sides of the entry in the trade's direction.
pub fn risk_reward(direction: Direction, levels: &Levels) -> Option<f64> {
    let Levels { entry, stop, target } = *levels;
    let ordered = match direction {
        Direction::Long => stop < entry && entry < target,
        Direction::Short => target < entry && entry < stop,
    };
    if !ordered || ![entry, stop, target].iter().all(|v| v.is_finite()) {
        return None;
    }
    Some((target - entry).abs() / (entry - stop).abs())
}

/// Split priced setups into those meeting `min_risk_reward` and discards
pub fn screen(setups: &[Setup], min_risk_reward: f64) -> (Vec<Setup>, Vec<DiscardedSetup>) {
    let mut passed = Vec::new();
    let mut discarded = Vec::new();

    for setup in setups {
        if setup.risk_reward >= min_risk_reward {
            passed.push(setup.clone());
        } else {
            discarded.push(DiscardedSetup::below_threshold(
                setup,
                format!(
                    "risk/reward {:.2} below minimum {:.2}",
                    setup.risk_reward, min_risk_reward
                ),
            ));
        }
    }

    (passed, discarded)
}

/// Prior day's extremes become stop and target
fn reversal_levels(direction: Direction, ev: &SetupEvidence) -> Result<Levels, String> {
    let (stop, target) = match direction {
        Direction::Long => (ev.prior_low, ev.prior_high),
        Direction::Short => (ev.prior_high, ev.prior_low),
    };
    Ok(Levels {
        entry: ev.last_price,
        stop,
        target,
    })
}

/// Stop at the gap edge, target projects the gap from the entry
fn gap_play_levels(direction: Direction, ev: &SetupEvidence) -> Result<Levels, String> {
    let entry = ev.last_price;
    let levels = match direction {
        Direction::Long => {
            let gap = ev.current_open - ev.prior_high;
            Levels {
                entry,
                stop: ev.prior_high,
                target: entry + gap,
            }
        }
        Direction::Short => {
            let gap = ev.prior_low - ev.current_open;
            Levels {
                entry,
                stop: ev.prior_low,
                target: entry - gap,
            }
        }
    };
    Ok(levels)
}

fn trend_continuation_levels(
    direction: Direction,
    ev: &SetupEvidence,
    atr_multiple: f64,
) -> Result<Levels, String> {
    let unit = ev.atr.unwrap_or_else(|| ev.prior_range());
    if unit <= 0.0 {
        return Err("trend-continuation needs a positive ATR or prior range".to_string());
    }

    let entry = ev.last_price;
    let levels = match direction {
        Direction::Long => Levels {
            entry,
            stop: ev.prior_low,
            target: entry + unit * atr_multiple,
        },
        Direction::Short => Levels {
            entry,
            stop: ev.prior_high,
            target: entry - unit * atr_multiple,
        },
    };
    Ok(levels)
}

/// Broken level is the stop, target projects the band height
fn range_break_levels(direction: Direction, ev: &SetupEvidence) -> Result<Levels, String> {
    let (Some(low), Some(high)) = (ev.range_low, ev.range_high) else {
        return Err("range-break without a lookback band".to_string());
    };

    let height = high - low;
    let entry = ev.last_price;
    let levels = match direction {
        Direction::Long => Levels {
            entry,
            stop: high,
            target: entry + height,
        },
        Direction::Short => Levels {
            entry,
            stop: low,
            target: entry - height,
        },
    };
    Ok(levels)
}
