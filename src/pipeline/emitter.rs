//! Event emitter: persists a diff result as immutable events and applies
//! the matching entity-store mutations.
//!
//! Everything for one run commits in a single transaction. An event row
//! must never exist without its entity mutation, and an aborted run must
//! leave no partial diff behind; the transaction is that boundary.

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use uuid::Uuid;

use crate::diff::DiffResult;
use crate::models::{Entity, EntityStatus, Event, EventKind, EventPayload, Watch, WatchRun};
use crate::repository::pool::{AsyncSqlitePool, DieselError};
use crate::schema::{entities, events};

/// Persists diff outcomes for one run.
#[derive(Clone)]
pub struct EventEmitter {
    pool: AsyncSqlitePool,
}

impl EventEmitter {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Apply a diff result atomically and return the emitted events.
    ///
    /// `stored` is the snapshot the diff ran against; rows are updated in
    /// place (appeared entities reuse their removed row when one exists).
    pub async fn apply(
        &self,
        watch: &Watch,
        run: &WatchRun,
        stored: &[Entity],
        diff: &DiffResult,
    ) -> Result<Vec<Event>, DieselError> {
        let mut conn = self.pool.get().await?;

        let run = run.clone();
        let schema_type = watch.schema_type.clone();
        let stored_by_id: HashMap<String, Entity> = stored
            .iter()
            .map(|e| (e.external_id.clone(), e.clone()))
            .collect();
        let appeared = diff.appeared.clone();
        let changed = diff.changed.clone();
        let disappeared = diff.disappeared.clone();
        let unchanged = diff.unchanged.clone();

        conn.transaction(|conn| {
            Box::pin(async move {
                let now = Utc::now();
                let now_s = now.to_rfc3339();
                let mut emitted = Vec::new();

                for outcome in &appeared {
                    let content = serde_json::to_string(&outcome.content)
                        .unwrap_or_else(|_| "{}".to_string());

                    let entity_id = match stored_by_id.get(&outcome.external_id) {
                        // Reactivation: revive the removed row.
                        Some(existing) => {
                            diesel::update(entities::table.find(&existing.id))
                                .set((
                                    entities::content.eq(&content),
                                    entities::status.eq(EntityStatus::Active.as_str()),
                                    entities::last_seen_at.eq(&now_s),
                                    entities::updated_at.eq(&now_s),
                                ))
                                .execute(conn)
                                .await?;
                            existing.id.clone()
                        }
                        None => {
                            let id = Uuid::new_v4().to_string();
                            diesel::insert_into(entities::table)
                                .values((
                                    entities::id.eq(&id),
                                    entities::org_id.eq(&run.org_id),
                                    entities::watch_id.eq(&run.watch_id),
                                    entities::schema_type.eq(&schema_type),
                                    entities::external_id.eq(&outcome.external_id),
                                    entities::content.eq(&content),
                                    entities::status.eq(EntityStatus::Active.as_str()),
                                    entities::first_seen_at.eq(&now_s),
                                    entities::last_seen_at.eq(&now_s),
                                    entities::created_at.eq(&now_s),
                                    entities::updated_at.eq(&now_s),
                                ))
                                .execute(conn)
                                .await?;
                            id
                        }
                    };

                    let payload = EventPayload {
                        entity: outcome.content.clone(),
                        changes: Vec::new(),
                    };
                    emitted.push(
                        insert_event(conn, &run, EventKind::EntityAppeared, &entity_id, payload)
                            .await?,
                    );
                }

                for outcome in &changed {
                    let existing = stored_by_id
                        .get(&outcome.external_id)
                        .ok_or(diesel::result::Error::NotFound)?;
                    let content = serde_json::to_string(&outcome.content)
                        .unwrap_or_else(|_| "{}".to_string());

                    diesel::update(entities::table.find(&existing.id))
                        .set((
                            entities::content.eq(&content),
                            entities::last_seen_at.eq(&now_s),
                            entities::updated_at.eq(&now_s),
                        ))
                        .execute(conn)
                        .await?;

                    let payload = EventPayload {
                        entity: outcome.content.clone(),
                        changes: outcome.changes.clone(),
                    };
                    emitted.push(
                        insert_event(conn, &run, EventKind::EntityChanged, &existing.id, payload)
                            .await?,
                    );
                }

                for external_id in &disappeared {
                    let existing = stored_by_id
                        .get(external_id)
                        .ok_or(diesel::result::Error::NotFound)?;

                    diesel::update(entities::table.find(&existing.id))
                        .set((
                            entities::status.eq(EntityStatus::Removed.as_str()),
                            entities::updated_at.eq(&now_s),
                        ))
                        .execute(conn)
                        .await?;

                    let payload = EventPayload {
                        entity: existing.content.clone(),
                        changes: Vec::new(),
                    };
                    emitted.push(
                        insert_event(
                            conn,
                            &run,
                            EventKind::EntityDisappeared,
                            &existing.id,
                            payload,
                        )
                        .await?,
                    );
                }

                // Unchanged entities get a freshness bump only; no event.
                for external_id in &unchanged {
                    if let Some(existing) = stored_by_id.get(external_id) {
                        diesel::update(entities::table.find(&existing.id))
                            .set(entities::last_seen_at.eq(&now_s))
                            .execute(conn)
                            .await?;
                    }
                }

                Ok(emitted)
            })
        })
        .await
    }
}

async fn insert_event(
    conn: &mut crate::repository::pool::AsyncSqliteConnection,
    run: &WatchRun,
    kind: EventKind,
    entity_id: &str,
    payload: EventPayload,
) -> Result<Event, DieselError> {
    let event = Event {
        id: Uuid::new_v4().to_string(),
        org_id: run.org_id.clone(),
        kind,
        watch_id: run.watch_id.clone(),
        watch_run_id: Some(run.id.clone()),
        entity_id: Some(entity_id.to_string()),
        payload,
        occurred_at: Utc::now(),
    };

    let payload_s =
        serde_json::to_string(&event.payload).unwrap_or_else(|_| "{}".to_string());

    diesel::insert_into(events::table)
        .values((
            events::id.eq(&event.id),
            events::org_id.eq(&event.org_id),
            events::event_type.eq(event.kind.as_str()),
            events::watch_id.eq(&event.watch_id),
            events::watch_run_id.eq(event.watch_run_id.as_deref()),
            events::entity_id.eq(event.entity_id.as_deref()),
            events::payload.eq(&payload_s),
            events::occurred_at.eq(event.occurred_at.to_rfc3339()),
        ))
        .execute(conn)
        .await?;

    Ok(event)
}
