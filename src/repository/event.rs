//! Event repository (read side).
//!
//! Events are append-only; inserts happen inside the event emitter's
//! transaction. This repository serves queries for the matcher, the
//! dispatcher, and read-only surfaces.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::parse_datetime;
use super::pool::{AsyncSqlitePool, DieselError};
use super::records::EventRecord;
use crate::models::{Event, EventKind, EventPayload};
use crate::schema::events;

impl From<EventRecord> for Event {
    fn from(record: EventRecord) -> Self {
        Event {
            id: record.id,
            org_id: record.org_id,
            kind: EventKind::from_str(&record.event_type).unwrap_or(EventKind::EntityChanged),
            watch_id: record.watch_id,
            watch_run_id: record.watch_run_id,
            entity_id: record.entity_id,
            payload: serde_json::from_str::<EventPayload>(&record.payload).unwrap_or_default(),
            occurred_at: parse_datetime(&record.occurred_at),
        }
    }
}

/// Diesel-based event repository.
#[derive(Clone)]
pub struct EventRepository {
    pool: AsyncSqlitePool,
}

impl EventRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Get an event by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Event>, DieselError> {
        let mut conn = self.pool.get().await?;

        events::table
            .find(id)
            .first::<EventRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Event::from))
    }

    /// Recent events, newest first, optionally scoped to one watch.
    pub async fn recent(
        &self,
        watch_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Event>, DieselError> {
        let mut conn = self.pool.get().await?;

        let mut query = events::table
            .order(events::occurred_at.desc())
            .limit(limit as i64)
            .into_boxed();

        if let Some(wid) = watch_id {
            query = query.filter(events::watch_id.eq(wid.to_string()));
        }

        query
            .load::<EventRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Event::from).collect())
    }

    /// Events emitted by one run, in occurrence order.
    pub async fn for_run(&self, run_id: &str) -> Result<Vec<Event>, DieselError> {
        let mut conn = self.pool.get().await?;

        events::table
            .filter(events::watch_run_id.eq(run_id))
            .order(events::occurred_at.asc())
            .load::<EventRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Event::from).collect())
    }

    /// Total event count (status display).
    pub async fn count(&self) -> Result<u64, DieselError> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        let count: i64 = events::table.select(count_star()).first(&mut conn).await?;
        Ok(count.max(0) as u64)
    }
}
