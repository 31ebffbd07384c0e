//! Environment-driven configuration
//!
//! Every setting has a default; `from_env` only overrides what is set.
//! Lookups go through a closure so tests can supply their own variables.

use backon::ExponentialBuilder;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::analysis::classify::ClassifierConfig;
use crate::models::{Instrument, Interval, TimeoutPolicy};

pub const DEFAULT_WATCHLIST: &[&str] = &["SPY", "QQQ", "IWM", "TSLA", "AAPL", "NVDA", "MSFT"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Deployment environment, `sandbox` unless `APP_ENV` says otherwise
pub fn get_environment() -> String {
    env::var("APP_ENV").unwrap_or_else(|_| "sandbox".to_string())
}

pub fn get_port() -> u16 {
    env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

pub fn get_redis_url() -> Option<String> {
    env::var("REDIS_URL").ok().filter(|u| !u.trim().is_empty())
}

pub fn get_webhook_url() -> Option<String> {
    env::var("WEBHOOK_URL").ok().filter(|u| !u.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct TradierConfig {
    pub base_url: String,
    pub token: String,
}

impl TradierConfig {
    /// `None` without `TRADIER_API_ACCESS_TOKEN`
    pub fn from_env() -> Option<Self> {
        let token = env::var("TRADIER_API_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())?;
        let base_url = env::var("TRADIER_BASE_URL")
            .unwrap_or_else(|_| crate::services::tradier::DEFAULT_BASE_URL.to_string());
        Some(Self { base_url, token })
    }
}

/// Exponential backoff bounds for one kind of retried call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }

    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay.max(min_delay);
        self
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalConfig {
    pub timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(900),
            timeout_policy: TimeoutPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrency: usize,
    pub min_risk_reward: f64,
    pub approval: ApprovalConfig,
    pub fetch_retry: RetryConfig,
    pub notify_retry: RetryConfig,
    /// Calendar days of history fetched per instrument; 300 covers a 200-day SMA
    pub history_days: u32,
    pub interval: Interval,
    /// Benchmark for relative strength; `None` disables trend detection
    pub benchmark: Option<Instrument>,
    pub classifier: ClassifierConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            min_risk_reward: 2.0,
            approval: ApprovalConfig::default(),
            fetch_retry: RetryConfig::new(3),
            notify_retry: RetryConfig::new(3),
            history_days: 300,
            interval: Interval::Daily,
            benchmark: Some(Instrument::new("SPY")),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_concurrency: usize =
            parse_or(&lookup, "MAX_CONCURRENT_ANALYSIS", defaults.max_concurrency)?;
        let min_risk_reward: f64 =
            parse_or(&lookup, "MIN_RISK_REWARD_RATIO", defaults.min_risk_reward)?;
        let timeout_secs: u64 = parse_or(
            &lookup,
            "APPROVAL_TIMEOUT_SECONDS",
            defaults.approval.timeout.as_secs(),
        )?;
        let timeout_policy: TimeoutPolicy = parse_or(
            &lookup,
            "APPROVAL_TIMEOUT_POLICY",
            defaults.approval.timeout_policy,
        )?;
        let fetch_attempts: u32 = parse_or(
            &lookup,
            "FETCH_MAX_ATTEMPTS",
            defaults.fetch_retry.max_attempts,
        )?;
        let notify_attempts: u32 = parse_or(
            &lookup,
            "NOTIFY_MAX_ATTEMPTS",
            defaults.notify_retry.max_attempts,
        )?;
        let history_days: u32 = parse_or(&lookup, "HISTORY_DAYS", defaults.history_days)?;
        let interval: Interval = parse_or(&lookup, "HISTORY_INTERVAL", defaults.interval)?;

        let benchmark = match lookup("BENCHMARK_SYMBOL") {
            Some(symbol) if symbol.trim().is_empty() => None,
            Some(symbol) => Some(Instrument::new(symbol)),
            None => defaults.benchmark,
        };

        if max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONCURRENT_ANALYSIS".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            max_concurrency,
            min_risk_reward,
            approval: ApprovalConfig {
                timeout: Duration::from_secs(timeout_secs),
                timeout_policy,
            },
            fetch_retry: RetryConfig::new(fetch_attempts),
            notify_retry: RetryConfig::new(notify_attempts),
            history_days,
            interval,
            benchmark,
            classifier: defaults.classifier,
        })
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    pub fn with_min_risk_reward(mut self, ratio: f64) -> Self {
        self.min_risk_reward = ratio;
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Duration, policy: TimeoutPolicy) -> Self {
        self.approval = ApprovalConfig {
            timeout,
            timeout_policy: policy,
        };
        self
    }

    pub fn with_fetch_retry(mut self, retry: RetryConfig) -> Self {
        self.fetch_retry = retry;
        self
    }

    pub fn with_notify_retry(mut self, retry: RetryConfig) -> Self {
        self.notify_retry = retry;
        self
    }

    pub fn with_benchmark(mut self, benchmark: Option<Instrument>) -> Self {
        self.benchmark = benchmark;
        self
    }
}

/// Seconds between scheduled scans; 0 disables them
pub fn get_scan_interval_seconds() -> u64 {
    env::var("SCAN_INTERVAL_SECONDS")
        .ok()
        .and_then(|i| i.parse().ok())
        .unwrap_or(0)
}

/// `DEFAULT_WATCHLIST` as a comma separated list, or the built-in one
pub fn get_watchlist() -> Vec<Instrument> {
    parse_watchlist(env::var("DEFAULT_WATCHLIST").ok().as_deref())
}

/// Entries are `SYMBOL` or `SYMBOL:EXCHANGE`
pub fn parse_watchlist(raw: Option<&str>) -> Vec<Instrument> {
    let symbols: Vec<Instrument> = raw
        .unwrap_or_default()
        .split(',')
        .map(parse_instrument)
        .filter(|i| !i.symbol.is_empty())
        .collect();

    if symbols.is_empty() {
        DEFAULT_WATCHLIST.iter().map(|s| Instrument::new(*s)).collect()
    } else {
        symbols
    }
}

fn parse_instrument(entry: &str) -> Instrument {
    let (symbol, exchange) = entry.split_once(':').unwrap_or((entry, ""));
    let instrument = Instrument::new(symbol);
    match exchange.trim() {
        "" => instrument,
        exchange => instrument.with_exchange(exchange.to_uppercase()),
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}
