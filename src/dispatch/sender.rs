//! Notification transports.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::models::Event;

#[derive(Debug, Error)]
pub enum SendError {
    /// Worth another attempt later.
    #[error("send failed: {0}")]
    Retryable(String),
    /// No amount of retrying will fix this delivery.
    #[error("undeliverable: {0}")]
    Terminal(String),
}

/// Pushes one event notification to a channel's recipients.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, recipients: &[String], event: &Event) -> Result<(), SendError>;
}

/// Posts the event payload as JSON to each recipient URL.
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelSender for WebhookSender {
    async fn send(&self, recipients: &[String], event: &Event) -> Result<(), SendError> {
        if recipients.is_empty() {
            return Err(SendError::Terminal(
                "channel config has no recipients".to_string(),
            ));
        }

        let body = serde_json::json!({
            "event_id": event.id,
            "event_type": event.kind.as_str(),
            "watch_id": event.watch_id,
            "occurred_at": event.occurred_at.to_rfc3339(),
            "payload": event.payload,
        });

        for url in recipients {
            let response = self
                .client
                .post(url)
                .json(&body)
                .send()
                .await
                .map_err(|e| SendError::Retryable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(SendError::Retryable(format!(
                    "webhook {url} returned {status}"
                )));
            }
            debug!(url = %url, event_id = %event.id, "webhook delivered");
        }

        Ok(())
    }
}
