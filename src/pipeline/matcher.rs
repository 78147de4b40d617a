//! Subscription matcher: fans each emitted event out to the
//! subscriptions it satisfies, as pending delivery rows.

use tracing::debug;

use crate::models::Event;
use crate::repository::pool::DieselError;
use crate::repository::{DbContext, DeliveryRepository, SubscriptionRepository};

/// Matches events against active subscriptions and enqueues deliveries.
#[derive(Clone)]
pub struct SubscriptionMatcher {
    subscriptions: SubscriptionRepository,
    deliveries: DeliveryRepository,
}

impl SubscriptionMatcher {
    pub fn new(db: &DbContext) -> Self {
        Self {
            subscriptions: db.subscriptions(),
            deliveries: db.deliveries(),
        }
    }

    /// Enqueue at most one pending delivery per (event, subscription)
    /// pair. Re-matching the same event is a no-op; the unique index on
    /// the pair makes the insert idempotent.
    ///
    /// Returns the number of deliveries actually created.
    pub async fn match_events(&self, events: &[Event]) -> Result<u32, DieselError> {
        let mut created = 0u32;

        for event in events {
            let candidates = self
                .subscriptions
                .candidates(&event.org_id, event.kind, &event.watch_id)
                .await?;

            for sub in candidates {
                if !sub.filters.matches(event.kind, &event.payload) {
                    continue;
                }
                if self
                    .deliveries
                    .ensure_pending(&event.org_id, &event.id, &sub.id)
                    .await?
                {
                    created += 1;
                    debug!(
                        event_id = %event.id,
                        subscription_id = %sub.id,
                        kind = event.kind.as_str(),
                        "delivery enqueued"
                    );
                }
            }
        }

        if created > 0 {
            debug!(events = events.len(), deliveries = created, "matched events");
        }
        Ok(created)
    }
}
