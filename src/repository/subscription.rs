//! Subscription repository.
//!
//! Subscriptions are configuration rows: soft-deleted, never hard-deleted
//! while deliveries reference them.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::warn;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::SubscriptionRecord;
use super::{parse_datetime, parse_datetime_opt};
use crate::filter::FilterSet;
use crate::models::{EventKind, Subscription, SubscriptionStatus};
use crate::schema::subscriptions;

impl TryFrom<SubscriptionRecord> for Subscription {
    type Error = serde_json::Error;

    /// Fails when the filters column is unparseable. An empty filter set
    /// matches everything, so defaulting here would turn a corrupt row
    /// into a match-all subscription; the caller decides whether to skip
    /// the row or surface the error.
    fn try_from(record: SubscriptionRecord) -> Result<Self, Self::Error> {
        let filters: FilterSet = serde_json::from_str(&record.filters)?;
        let event_kinds: Vec<String> =
            serde_json::from_str(&record.event_types).unwrap_or_default();

        Ok(Subscription {
            id: record.id,
            org_id: record.org_id,
            name: record.name,
            event_kinds: event_kinds
                .iter()
                .filter_map(|s| EventKind::from_str(s))
                .collect(),
            watch_id: record.watch_id,
            filters,
            channel_type: record.channel_type,
            channel_config: serde_json::from_str(&record.channel_config).unwrap_or_default(),
            status: SubscriptionStatus::from_str(&record.status)
                .unwrap_or(SubscriptionStatus::Paused),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
            deleted_at: parse_datetime_opt(record.deleted_at),
        })
    }
}

/// Convert loaded rows, warning about and dropping any whose filters
/// column does not parse.
fn convert_skipping_unreadable(records: Vec<SubscriptionRecord>) -> Vec<Subscription> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.clone();
            match Subscription::try_from(record) {
                Ok(sub) => Some(sub),
                Err(err) => {
                    warn!(
                        subscription_id = %id,
                        error = %err,
                        "subscription filters unreadable, skipping"
                    );
                    None
                }
            }
        })
        .collect()
}

/// Diesel-based subscription repository.
#[derive(Clone)]
pub struct SubscriptionRepository {
    pool: AsyncSqlitePool,
}

impl SubscriptionRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Get a subscription by ID. A row whose filters column does not
    /// parse surfaces as a deserialization error rather than a silent
    /// match-all filter set.
    pub async fn get(&self, id: &str) -> Result<Option<Subscription>, DieselError> {
        let mut conn = self.pool.get().await?;

        let record = subscriptions::table
            .find(id)
            .first::<SubscriptionRecord>(&mut conn)
            .await
            .optional()?;

        match record {
            None => Ok(None),
            Some(record) => Subscription::try_from(record)
                .map(Some)
                .map_err(|err| DieselError::DeserializationError(Box::new(err))),
        }
    }

    /// All subscriptions that are not soft-deleted. Rows with unreadable
    /// filters are warned about and left out.
    pub async fn get_all(&self) -> Result<Vec<Subscription>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records = subscriptions::table
            .filter(subscriptions::deleted_at.is_null())
            .order(subscriptions::created_at.asc())
            .load::<SubscriptionRecord>(&mut conn)
            .await?;

        Ok(convert_skipping_unreadable(records))
    }

    /// Candidate subscriptions for an event: active, in scope for the
    /// watch, and interested in the event kind.
    ///
    /// Scope and status narrow in SQL; event-kind membership is checked
    /// after parsing the JSON event_types column. A subscription whose
    /// stored filters fail to parse is skipped with a warning so it can
    /// never fire on events it was not meant to match.
    pub async fn candidates(
        &self,
        org_id: &str,
        kind: EventKind,
        watch_id: &str,
    ) -> Result<Vec<Subscription>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records = subscriptions::table
            .filter(subscriptions::deleted_at.is_null())
            .filter(subscriptions::org_id.eq(org_id))
            .filter(subscriptions::status.eq(SubscriptionStatus::Active.as_str()))
            .filter(
                subscriptions::watch_id
                    .is_null()
                    .or(subscriptions::watch_id.eq(watch_id)),
            )
            .load::<SubscriptionRecord>(&mut conn)
            .await?;

        Ok(convert_skipping_unreadable(records)
            .into_iter()
            .filter(|sub| sub.event_kinds.contains(&kind))
            .collect())
    }

    /// Save a subscription (insert or update).
    pub async fn save(&self, sub: &Subscription) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        let event_types: Vec<&str> = sub.event_kinds.iter().map(|k| k.as_str()).collect();
        let event_types =
            serde_json::to_string(&event_types).unwrap_or_else(|_| "[]".to_string());
        let filters = serde_json::to_string(&sub.filters).unwrap_or_else(|_| "{}".to_string());
        let channel_config =
            serde_json::to_string(&sub.channel_config).unwrap_or_else(|_| "{}".to_string());
        let created_at = sub.created_at.to_rfc3339();
        let updated_at = sub.updated_at.to_rfc3339();
        let deleted_at = sub.deleted_at.map(|dt| dt.to_rfc3339());

        diesel::replace_into(subscriptions::table)
            .values((
                subscriptions::id.eq(&sub.id),
                subscriptions::org_id.eq(&sub.org_id),
                subscriptions::name.eq(&sub.name),
                subscriptions::event_types.eq(&event_types),
                subscriptions::watch_id.eq(&sub.watch_id),
                subscriptions::filters.eq(&filters),
                subscriptions::channel_type.eq(&sub.channel_type),
                subscriptions::channel_config.eq(&channel_config),
                subscriptions::status.eq(sub.status.as_str()),
                subscriptions::created_at.eq(&created_at),
                subscriptions::updated_at.eq(&updated_at),
                subscriptions::deleted_at.eq(&deleted_at),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Set subscription status (pause/resume).
    pub async fn set_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows = diesel::update(subscriptions::table.find(id))
            .set((
                subscriptions::status.eq(status.as_str()),
                subscriptions::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }

    /// Soft-delete a subscription; delivery rows keep referencing it.
    pub async fn soft_delete(&self, id: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        let rows = diesel::update(subscriptions::table.find(id))
            .set((
                subscriptions::deleted_at.eq(Some(&now)),
                subscriptions::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }
}
