//! Alert delivery for critical anomalies.
//!
//! Delivery is fire-once: the coordinator spawns a send and moves on. A
//! failed delivery is logged and dropped, never retried, and never touches
//! the ingestion response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::AlertsConfig;
use crate::detect::{Anomaly, Severity};
use crate::event::SignalType;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned {status}")]
    Status { status: reqwest::StatusCode },
}

/// JSON body POSTed to the alert webhook.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub user_id: String,
    pub signal_type: SignalType,
    pub severity: Severity,
    pub count: u32,
    pub threshold: u32,
    pub detected_at: DateTime<Utc>,
}

impl From<&Anomaly> for AlertPayload {
    fn from(anomaly: &Anomaly) -> Self {
        Self {
            user_id: anomaly.user_id.clone(),
            signal_type: anomaly.signal_type,
            severity: anomaly.severity,
            count: anomaly.window_count,
            threshold: anomaly.threshold,
            detected_at: anomaly.detected_at,
        }
    }
}

/// Trait for alert delivery channels.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert through this channel.
    async fn send(&self, alert: &AlertPayload) -> Result<(), NotifyError>;
}

/// Delivers alerts as JSON over HTTP to a single configured endpoint.
#[derive(Debug)]
pub struct WebhookSink {
    url: String,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl WebhookSink {
    /// Build the sink with the webhook URL and request timeout from config.
    pub fn new(config: &AlertsConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            url: config.webhook_url.clone(),
            client,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn send(&self, alert: &AlertPayload) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(NotifyError::Status { status });
        }

        debug!(url = %self.url, %status, "alert delivered");
        Ok(())
    }
}
