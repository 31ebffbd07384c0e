//! Unit tests for per-kind risk rules

use chrono::Utc;
use setupflow::analysis::{assess, classify, risk_reward, screen, ClassifierConfig, Levels};
use setupflow::models::{Direction, SetupCandidate, SetupKind};

use crate::common_bars::{aaa_reversal, bar};

fn first_candidate(symbol: &str, bars: &[setupflow::models::Bar]) -> SetupCandidate {
    classify(symbol, bars, None, &ClassifierConfig::default())
        .into_iter()
        .next()
        .expect("expected a candidate")
}

#[test]
fn test_reversal_uses_prior_day_extremes() {
    let candidate = first_candidate("AAA", &aaa_reversal());
    let setup = assess(&candidate, "session-1", &ClassifierConfig::default(), Utc::now()).unwrap();

    assert_eq!(setup.kind, SetupKind::ReversalPattern);
    assert_eq!(setup.entry, 101.0);
    assert_eq!(setup.stop, 100.0);
    assert_eq!(setup.target, 102.0);
    assert!((setup.risk_reward - 1.0).abs() < 1e-9);
}

#[test]
fn test_reversal_below_threshold_is_discarded() {
    let candidate = first_candidate("AAA", &aaa_reversal());
    let setup = assess(&candidate, "session-1", &ClassifierConfig::default(), Utc::now()).unwrap();

    let (passed, discarded) = screen(&[setup.clone()], 2.0);
    assert!(passed.is_empty());
    assert_eq!(discarded.len(), 1);
    assert_eq!(discarded[0].setup.as_ref().map(|s| s.id.clone()), Some(setup.id.clone()));
    assert!(discarded[0].reason.contains("below minimum 2.00"));

    let (passed, _) = screen(&[setup], 1.0);
    assert_eq!(passed.len(), 1);
}

#[test]
fn test_short_reversal_levels_are_mirrored() {
    let bars = vec![
        bar(0, 100.2, 102.0, 100.0, 101.8),
        bar(1, 101.5, 101.6, 101.3, 101.4),
    ];
    let candidate = first_candidate("EEE", &bars);
    let setup = assess(&candidate, "s", &ClassifierConfig::default(), Utc::now()).unwrap();

    assert_eq!(setup.direction, Direction::Short);
    assert_eq!(setup.stop, 102.0);
    assert_eq!(setup.target, 100.0);
    assert!((setup.risk_reward - 1.4 / 0.6).abs() < 1e-6);
}

#[test]
fn test_gap_play_stops_at_gap_edge() {
    let bars = vec![bar(0, 100.0, 101.0, 99.0, 100.5), bar(1, 103.0, 104.0, 102.5, 103.5)];
    let candidate = first_candidate("GAP", &bars);
    let setup = assess(&candidate, "s", &ClassifierConfig::default(), Utc::now()).unwrap();

    assert_eq!(setup.kind, SetupKind::GapPlay);
    assert_eq!(setup.stop, 101.0);
    assert_eq!(setup.target, 105.5);
}

#[test]
fn test_range_break_projects_band_height() {
    let mut bars: Vec<_> = (0..10).map(|i| bar(i, 100.0, 101.0, 99.0, 100.2)).collect();
    bars.push(bar(10, 100.5, 103.5, 100.4, 103.2));
    let candidate = first_candidate("RNG", &bars);
    let setup = assess(&candidate, "s", &ClassifierConfig::default(), Utc::now()).unwrap();

    assert_eq!(setup.kind, SetupKind::RangeBreak);
    assert_eq!(setup.stop, 101.0);
    assert!((setup.target - 105.2).abs() < 1e-9);
}

#[test]
fn test_setup_ids_are_stable_per_session() {
    let candidate = first_candidate("AAA", &aaa_reversal());
    let config = ClassifierConfig::default();

    let a = assess(&candidate, "session-1", &config, Utc::now()).unwrap();
    let b = assess(&candidate, "session-1", &config, Utc::now()).unwrap();
    let c = assess(&candidate, "session-2", &config, Utc::now()).unwrap();

    assert_eq!(a.id, b.id);
    assert_ne!(a.id, c.id);
}

#[test]
fn test_risk_reward_requires_ordered_levels() {
    let long = Levels { entry: 10.0, stop: 9.0, target: 12.0 };
    assert_eq!(risk_reward(Direction::Long, &long), Some(2.0));
    assert_eq!(risk_reward(Direction::Short, &long), None);

    let flat = Levels { entry: 10.0, stop: 10.0, target: 12.0 };
    assert_eq!(risk_reward(Direction::Long, &flat), None);
}
