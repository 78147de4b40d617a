//! Delivery dispatcher: sweeps pending deliveries and pushes them out.

pub mod sender;

pub use sender::{ChannelSender, SendError, WebhookSender};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::models::Delivery;
use crate::repository::pool::DieselError;
use crate::repository::DbContext;

/// Ceiling on the exponential retry backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// How many due deliveries one sweep claims at most.
const SWEEP_BATCH: u32 = 50;

/// Sweeps due deliveries and dispatches them over their channels.
pub struct DeliveryProcessor {
    db: DbContext,
    senders: HashMap<String, Arc<dyn ChannelSender>>,
    sweep_interval: Duration,
    claim_lease: Duration,
    retry_base: Duration,
    max_concurrent: usize,
}

impl DeliveryProcessor {
    pub fn new(
        db: DbContext,
        sweep_interval: Duration,
        retry_base: Duration,
        max_concurrent: usize,
    ) -> Self {
        let mut senders: HashMap<String, Arc<dyn ChannelSender>> = HashMap::new();
        senders.insert("webhook".to_string(), Arc::new(WebhookSender::new()));

        // The lease outlives any plausible attempt; a crashed worker's
        // claims come back after it expires.
        let claim_lease = Duration::from_secs(120);

        Self {
            db,
            senders,
            sweep_interval,
            claim_lease,
            retry_base,
            max_concurrent,
        }
    }

    /// Register a transport for a channel type, replacing any default.
    pub fn with_sender(mut self, channel_type: &str, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(channel_type.to_string(), sender);
        self
    }

    /// Run the sweep loop forever. The first sweep happens immediately.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            workers = self.max_concurrent,
            "delivery dispatcher started"
        );

        let mut ticker = tokio::time::interval(self.sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.clone().sweep().await {
                error!(error = %err, "delivery sweep failed");
            }
        }
    }

    /// One sweep: claim due deliveries and process them concurrently.
    pub async fn sweep(self: Arc<Self>) -> Result<usize, DieselError> {
        let lease = chrono::Duration::from_std(self.claim_lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let claimed = self
            .db
            .deliveries()
            .claim_due(Utc::now(), SWEEP_BATCH, lease)
            .await?;

        if claimed.is_empty() {
            return Ok(0);
        }
        debug!(claimed = claimed.len(), "processing due deliveries");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(claimed.len());

        for delivery in claimed {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let processor = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = processor.process(&delivery).await {
                    error!(delivery_id = %delivery.id, error = %err, "delivery processing failed");
                }
            }));
        }

        let count = handles.len();
        futures::future::join_all(handles).await;
        Ok(count)
    }

    /// Attempt one delivery and record the outcome.
    pub async fn process(&self, delivery: &Delivery) -> Result<(), DieselError> {
        let attempts = delivery.attempts + 1;

        let outcome = self.attempt(delivery).await;
        match outcome {
            Ok(()) => {
                info!(
                    delivery_id = %delivery.id,
                    event_id = %delivery.event_id,
                    attempts,
                    "delivered"
                );
                self.db.deliveries().mark_delivered(&delivery.id).await
            }
            Err(SendError::Terminal(message)) => {
                warn!(delivery_id = %delivery.id, error = %message, "delivery failed terminally");
                self.db
                    .deliveries()
                    .mark_failed(&delivery.id, attempts, &message)
                    .await
            }
            Err(SendError::Retryable(message)) => {
                if attempts >= delivery.max_attempts {
                    warn!(
                        delivery_id = %delivery.id,
                        attempts,
                        error = %message,
                        "delivery exhausted its attempts"
                    );
                    self.db
                        .deliveries()
                        .mark_failed(&delivery.id, attempts, &message)
                        .await
                } else {
                    let delay = retry_backoff(self.retry_base, attempts);
                    let next = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));
                    debug!(
                        delivery_id = %delivery.id,
                        attempts,
                        retry_in_secs = delay.as_secs(),
                        error = %message,
                        "delivery will retry"
                    );
                    self.db
                        .deliveries()
                        .mark_retry(&delivery.id, attempts, next, &message)
                        .await
                }
            }
        }
    }

    async fn attempt(&self, delivery: &Delivery) -> Result<(), SendError> {
        let event = self
            .db
            .events()
            .get(&delivery.event_id)
            .await
            .map_err(|e| SendError::Retryable(e.to_string()))?
            .ok_or_else(|| SendError::Terminal("event row missing".to_string()))?;

        let subscription = self
            .db
            .subscriptions()
            .get(&delivery.subscription_id)
            .await
            .map_err(|e| SendError::Retryable(e.to_string()))?
            .ok_or_else(|| SendError::Terminal("subscription row missing".to_string()))?;

        let sender = self
            .senders
            .get(&subscription.channel_type)
            .ok_or_else(|| {
                SendError::Terminal(format!(
                    "unsupported channel type '{}'",
                    subscription.channel_type
                ))
            })?;

        sender
            .send(&subscription.channel_config.to, &event)
            .await
    }
}

/// Exponential backoff for attempt N (1-based): base * 2^(N-1), capped.
fn retry_backoff(base: Duration, attempts: u32) -> Duration {
    let factor = 1u32.checked_shl(attempts.saturating_sub(1)).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let base = Duration::from_secs(30);
        assert_eq!(retry_backoff(base, 1), Duration::from_secs(30));
        assert_eq!(retry_backoff(base, 2), Duration::from_secs(60));
        assert_eq!(retry_backoff(base, 3), Duration::from_secs(120));
        assert_eq!(retry_backoff(base, 4), Duration::from_secs(240));
    }

    #[test]
    fn test_backoff_caps() {
        let base = Duration::from_secs(30);
        assert_eq!(retry_backoff(base, 20), MAX_BACKOFF);
        assert_eq!(retry_backoff(base, u32::MAX), MAX_BACKOFF);
    }
}
