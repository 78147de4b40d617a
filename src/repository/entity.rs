//! Entity repository (read side).
//!
//! Entities are mutated only inside the event emitter's transaction; this
//! repository provides the snapshot reads the diff engine and the UI
//! surfaces need.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::parse_datetime;
use super::pool::{AsyncSqlitePool, DieselError};
use super::records::EntityRecord;
use crate::models::{Entity, EntityStatus};
use crate::schema::entities;

impl From<EntityRecord> for Entity {
    fn from(record: EntityRecord) -> Self {
        Entity {
            id: record.id,
            org_id: record.org_id,
            watch_id: record.watch_id,
            schema_type: record.schema_type,
            external_id: record.external_id,
            content: serde_json::from_str(&record.content).unwrap_or_default(),
            status: EntityStatus::from_str(&record.status).unwrap_or(EntityStatus::Removed),
            first_seen_at: parse_datetime(&record.first_seen_at),
            last_seen_at: parse_datetime(&record.last_seen_at),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Diesel-based entity repository.
#[derive(Clone)]
pub struct EntityRepository {
    pool: AsyncSqlitePool,
}

impl EntityRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Get an entity by row ID.
    pub async fn get(&self, id: &str) -> Result<Option<Entity>, DieselError> {
        let mut conn = self.pool.get().await?;

        entities::table
            .find(id)
            .first::<EntityRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Entity::from))
    }

    /// Get the full snapshot for a watch, including removed entities.
    ///
    /// Removed rows are part of the snapshot on purpose: a reappearing
    /// external id must reactivate its old row, not create a fresh one.
    pub async fn snapshot_for_watch(&self, watch_id: &str) -> Result<Vec<Entity>, DieselError> {
        let mut conn = self.pool.get().await?;

        entities::table
            .filter(entities::watch_id.eq(watch_id))
            .load::<EntityRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Entity::from).collect())
    }

    /// Count entities per status for a watch.
    pub async fn count_by_status(
        &self,
        watch_id: &str,
        status: EntityStatus,
    ) -> Result<u64, DieselError> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        let count: i64 = entities::table
            .filter(entities::watch_id.eq(watch_id))
            .filter(entities::status.eq(status.as_str()))
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count.max(0) as u64)
    }
}
