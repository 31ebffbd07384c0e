//! Unit tests for runtime configuration and the scan trigger cadence

use std::time::Duration;

use setupflow::config::DEFAULT_WATCHLIST;
use setupflow::core::runtime::RuntimeConfig;
use setupflow::core::trigger::{cron_expression, Cadence};

#[test]
fn test_runtime_config_default_disables_scheduling() {
    let config = RuntimeConfig::default();
    assert_eq!(config.scan_interval_seconds, 0);
    assert_eq!(config.watchlist.len(), DEFAULT_WATCHLIST.len());
}

#[test]
fn test_cron_expression_sub_minute() {
    assert_eq!(cron_expression(30).as_deref(), Some("*/30 * * * * *"));
    assert_eq!(cron_expression(1).as_deref(), Some("*/1 * * * * *"));
}

#[test]
fn test_cron_expression_minutes() {
    assert_eq!(cron_expression(300).as_deref(), Some("0 */5 * * * *"));
    assert_eq!(cron_expression(60).as_deref(), Some("0 */1 * * * *"));
}

#[test]
fn test_cron_expression_hours() {
    assert_eq!(cron_expression(3600).as_deref(), Some("0 0 */1 * * *"));
    assert_eq!(cron_expression(6 * 3600).as_deref(), Some("0 0 */6 * * *"));
    assert_eq!(cron_expression(86_400).as_deref(), Some("0 0 0 * * *"));
}

#[test]
fn test_cron_expression_refuses_drifting_steps() {
    // */45 seconds would fire at :00 and :45
    assert_eq!(cron_expression(45), None);
    // 90s is not a whole number of minutes
    assert_eq!(cron_expression(90), None);
    // */7 minutes restarts at every hour
    assert_eq!(cron_expression(7 * 60), None);
    assert_eq!(cron_expression(5 * 3600), None);
    assert_eq!(cron_expression(2 * 86_400), None);
    assert_eq!(cron_expression(0), None);
}

#[test]
fn test_cadence_falls_back_to_fixed_interval() {
    match Cadence::for_interval(90).unwrap() {
        Cadence::Every(period) => assert_eq!(period, Duration::from_secs(90)),
        other => panic!("expected a fixed interval, got {:?}", other),
    }
    match Cadence::for_interval(7200).unwrap() {
        Cadence::Cron(schedule) => assert_eq!(schedule.to_string(), "0 0 */2 * * *"),
        other => panic!("expected a cron schedule, got {:?}", other),
    }
    assert!(Cadence::for_interval(0).is_err());
}
