//! Notification sinks for approved alerts.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Alert, AlertLevel};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotificationError {
    /// Worth retrying
    #[error("notification endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

impl NotificationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotificationError::Unreachable(_))
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<(), NotificationError>;
}

/// Writes alerts to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), NotificationError> {
        match alert.level {
            AlertLevel::High => warn!(
                session_id = %alert.session_id,
                symbol = %alert.symbol,
                alert_id = %alert.id,
                "ALERT [high]: {}",
                alert.message
            ),
            _ => info!(
                session_id = %alert.session_id,
                symbol = %alert.symbol,
                alert_id = %alert.id,
                level = ?alert.level,
                "ALERT: {}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// POSTs each alert as JSON to a webhook
pub struct WebhookNotificationSink {
    client: Client,
    url: String,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self::with_client(url, client))
    }

    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| NotificationError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() || status.as_u16() == 429 {
            Err(NotificationError::Unreachable(format!("HTTP {}", status)))
        } else {
            Err(NotificationError::Rejected(format!("HTTP {}", status)))
        }
    }
}
