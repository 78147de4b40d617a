//! Delivery repository.
//!
//! One row per matched (event, subscription) pair, enforced by a unique
//! index; retries mutate the row. Sweep exclusivity uses the same claim
//! pattern as run claims: selection and lease renewal happen in one
//! transaction, so two sweep cycles cannot pick up the same row.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use uuid::Uuid;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::DeliveryRecord;
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{Delivery, DeliveryStatus, DEFAULT_MAX_ATTEMPTS};
use crate::schema::deliveries;

impl From<DeliveryRecord> for Delivery {
    fn from(record: DeliveryRecord) -> Self {
        Delivery {
            id: record.id,
            org_id: record.org_id,
            event_id: record.event_id,
            subscription_id: record.subscription_id,
            status: DeliveryStatus::from_str(&record.status).unwrap_or(DeliveryStatus::Failed),
            attempts: record.attempts.max(0) as u32,
            max_attempts: record.max_attempts.max(0) as u32,
            next_retry_at: parse_datetime(&record.next_retry_at),
            last_error: record.last_error,
            delivered_at: parse_datetime_opt(record.delivered_at),
            created_at: parse_datetime(&record.created_at),
        }
    }
}

/// Diesel-based delivery repository.
#[derive(Clone)]
pub struct DeliveryRepository {
    pool: AsyncSqlitePool,
}

impl DeliveryRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Create a pending delivery for the pair unless one already exists.
    ///
    /// Returns true if a new row was created. Repeated matcher evaluation
    /// of the same event never produces a second row; the unique pair
    /// index backs this even under concurrent writers.
    pub async fn ensure_pending(
        &self,
        org_id: &str,
        event_id: &str,
        subscription_id: &str,
    ) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        let rows = diesel::insert_or_ignore_into(deliveries::table)
            .values((
                deliveries::id.eq(Uuid::new_v4().to_string()),
                deliveries::org_id.eq(org_id),
                deliveries::event_id.eq(event_id),
                deliveries::subscription_id.eq(subscription_id),
                deliveries::status.eq(DeliveryStatus::Pending.as_str()),
                deliveries::attempts.eq(0),
                deliveries::max_attempts.eq(DEFAULT_MAX_ATTEMPTS as i32),
                deliveries::next_retry_at.eq(&now),
                deliveries::created_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }

    /// Atomically claim due deliveries for one sweep cycle.
    ///
    /// A delivery is due when status is pending and next_retry_at has
    /// passed. Claiming pushes next_retry_at forward by `lease` in the
    /// same transaction as the selection, which removes the rows from
    /// sweep eligibility until the attempt records its outcome.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<Delivery>, DieselError> {
        let mut conn = self.pool.get().await?;
        let now_s = now.to_rfc3339();
        let lease_until = (now + lease).to_rfc3339();
        let limit = limit as i64;

        conn.transaction(|conn| {
            Box::pin(async move {
                let records: Vec<DeliveryRecord> = deliveries::table
                    .filter(deliveries::status.eq(DeliveryStatus::Pending.as_str()))
                    .filter(deliveries::next_retry_at.le(&now_s))
                    .order(deliveries::next_retry_at.asc())
                    .limit(limit)
                    .load(conn)
                    .await?;

                for record in &records {
                    diesel::update(deliveries::table.find(&record.id))
                        .set(deliveries::next_retry_at.eq(&lease_until))
                        .execute(conn)
                        .await?;
                }

                Ok(records.into_iter().map(Delivery::from).collect())
            })
        })
        .await
    }

    /// Mark a delivery as successfully delivered.
    pub async fn mark_delivered(&self, id: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        diesel::update(deliveries::table.find(id))
            .set((
                deliveries::status.eq(DeliveryStatus::Delivered.as_str()),
                deliveries::delivered_at.eq(Some(&now)),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Record a failed attempt and schedule the next retry.
    pub async fn mark_retry(
        &self,
        id: &str,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(deliveries::table.find(id))
            .set((
                deliveries::attempts.eq(attempts as i32),
                deliveries::next_retry_at.eq(next_retry_at.to_rfc3339()),
                deliveries::last_error.eq(Some(error)),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Mark a delivery terminally failed; it is never swept again.
    pub async fn mark_failed(
        &self,
        id: &str,
        attempts: u32,
        error: &str,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(deliveries::table.find(id))
            .set((
                deliveries::status.eq(DeliveryStatus::Failed.as_str()),
                deliveries::attempts.eq(attempts as i32),
                deliveries::last_error.eq(Some(error)),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Get a delivery by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Delivery>, DieselError> {
        let mut conn = self.pool.get().await?;

        deliveries::table
            .find(id)
            .first::<DeliveryRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Delivery::from))
    }

    /// All deliveries for one event.
    pub async fn for_event(&self, event_id: &str) -> Result<Vec<Delivery>, DieselError> {
        let mut conn = self.pool.get().await?;

        deliveries::table
            .filter(deliveries::event_id.eq(event_id))
            .load::<DeliveryRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Delivery::from).collect())
    }

    /// Count deliveries in a given status (status display).
    pub async fn count_by_status(&self, status: DeliveryStatus) -> Result<u64, DieselError> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        let count: i64 = deliveries::table
            .filter(deliveries::status.eq(status.as_str()))
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSet;
    use crate::models::{ChannelConfig, EventKind, Subscription, Watch};
    use crate::repository::DbContext;
    use crate::schema::events;
    use tempfile::tempdir;

    // Deliveries reference events and subscriptions, which reference
    // watches; the pool enforces foreign keys, so seed the parents.
    async fn setup() -> (DbContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();

        let mut watch = Watch::new(
            "default".into(),
            "w".into(),
            "https://example.com".into(),
            "product".into(),
            serde_json::json!({}),
            "0 * * * *".into(),
            vec!["id".into()],
        );
        watch.id = "watch-1".into();
        ctx.watches().save(&watch).await.unwrap();

        let mut conn = ctx.pool().get().await.unwrap();
        let now = Utc::now().to_rfc3339();
        diesel::insert_into(events::table)
            .values((
                events::id.eq("ev-1"),
                events::org_id.eq("default"),
                events::event_type.eq(EventKind::EntityChanged.as_str()),
                events::watch_id.eq("watch-1"),
                events::watch_run_id.eq(None::<String>),
                events::entity_id.eq(None::<String>),
                events::payload.eq("{\"entity\":{}}"),
                events::occurred_at.eq(&now),
            ))
            .execute(&mut conn)
            .await
            .unwrap();

        for sub_id in ["sub-1", "sub-2"] {
            let mut sub = Subscription::new(
                "default".into(),
                sub_id.into(),
                vec![EventKind::EntityChanged],
                None,
                FilterSet::default(),
                "webhook".into(),
                ChannelConfig {
                    to: vec!["https://hooks.example.com/x".into()],
                },
            );
            sub.id = sub_id.into();
            ctx.subscriptions().save(&sub).await.unwrap();
        }

        (ctx, dir)
    }

    #[tokio::test]
    async fn test_at_most_one_row_per_pair() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.deliveries();

        assert!(repo.ensure_pending("default", "ev-1", "sub-1").await.unwrap());
        // Second evaluation of the same pair is a no-op.
        assert!(!repo.ensure_pending("default", "ev-1", "sub-1").await.unwrap());
        // Different subscription is a different pair.
        assert!(repo.ensure_pending("default", "ev-1", "sub-2").await.unwrap());

        assert_eq!(repo.for_event("ev-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_claim_removes_sweep_eligibility() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.deliveries();
        repo.ensure_pending("default", "ev-1", "sub-1").await.unwrap();

        let now = Utc::now() + Duration::seconds(1);
        let claimed = repo.claim_due(now, 10, Duration::minutes(5)).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // A second sweep at the same instant sees nothing: the lease moved
        // next_retry_at into the future.
        let second = repo.claim_due(now, 10, Duration::minutes(5)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_failure_is_never_swept_again() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.deliveries();
        repo.ensure_pending("default", "ev-1", "sub-1").await.unwrap();

        let now = Utc::now() + Duration::seconds(1);
        let claimed = repo.claim_due(now, 10, Duration::minutes(5)).await.unwrap();
        let delivery = &claimed[0];

        repo.mark_failed(&delivery.id, 5, "connection refused")
            .await
            .unwrap();

        let stored = repo.get(&delivery.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.attempts, 5);
        assert_eq!(stored.last_error.as_deref(), Some("connection refused"));

        let later = Utc::now() + Duration::days(365);
        assert!(repo
            .claim_due(later, 10, Duration::minutes(5))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_retry_reschedules_same_row() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.deliveries();
        repo.ensure_pending("default", "ev-1", "sub-1").await.unwrap();

        let claimed = repo
            .claim_due(Utc::now() + Duration::seconds(1), 10, Duration::minutes(5))
            .await
            .unwrap();
        let id = claimed[0].id.clone();

        let retry_at = Utc::now() + Duration::minutes(1);
        repo.mark_retry(&id, 1, retry_at, "timeout").await.unwrap();

        let stored = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert_eq!(stored.attempts, 1);

        // Due again once the retry window passes, and it is the same row.
        let reclaimed = repo
            .claim_due(retry_at + Duration::seconds(1), 10, Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, id);
    }
}
