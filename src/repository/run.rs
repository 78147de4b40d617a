//! Watch run repository.
//!
//! The run claim in `try_start` is the per-watch mutual-exclusion
//! boundary: checking for a running row and inserting the new one happen
//! in one transaction, so the exclusion holds across processes and
//! restarts, not just within one scheduler task.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use uuid::Uuid;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::WatchRunRecord;
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{RunStats, RunStatus, WatchRun};
use crate::schema::watch_runs;

impl From<WatchRunRecord> for WatchRun {
    fn from(record: WatchRunRecord) -> Self {
        WatchRun {
            id: record.id,
            org_id: record.org_id,
            watch_id: record.watch_id,
            status: RunStatus::from_str(&record.status).unwrap_or(RunStatus::Failed),
            started_at: parse_datetime(&record.started_at),
            completed_at: parse_datetime_opt(record.completed_at),
            entities_found: record.entities_found.map(|v| v.max(0) as u32),
            entities_new: record.entities_new.map(|v| v.max(0) as u32),
            entities_changed: record.entities_changed.map(|v| v.max(0) as u32),
            entities_removed: record.entities_removed.map(|v| v.max(0) as u32),
            events_emitted: record.events_emitted.map(|v| v.max(0) as u32),
            error_message: record.error_message,
        }
    }
}

/// Diesel-based watch run repository.
#[derive(Clone)]
pub struct RunRepository {
    pool: AsyncSqlitePool,
}

impl RunRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Atomically claim a run for a watch.
    ///
    /// Returns None if a run is already in `running` state for the watch;
    /// the caller must treat that as a rejection, not queue behind it.
    pub async fn try_start(
        &self,
        org_id: &str,
        watch_id: &str,
    ) -> Result<Option<WatchRun>, DieselError> {
        let mut conn = self.pool.get().await?;
        let org_id = org_id.to_string();
        let watch_id = watch_id.to_string();

        conn.transaction(|conn| {
            Box::pin(async move {
                use diesel::dsl::count_star;
                let running: i64 = watch_runs::table
                    .filter(watch_runs::watch_id.eq(&watch_id))
                    .filter(watch_runs::status.eq(RunStatus::Running.as_str()))
                    .select(count_star())
                    .first(conn)
                    .await?;

                if running > 0 {
                    return Ok(None);
                }

                let run = WatchRun {
                    id: Uuid::new_v4().to_string(),
                    org_id: org_id.clone(),
                    watch_id: watch_id.clone(),
                    status: RunStatus::Running,
                    started_at: Utc::now(),
                    completed_at: None,
                    entities_found: None,
                    entities_new: None,
                    entities_changed: None,
                    entities_removed: None,
                    events_emitted: None,
                    error_message: None,
                };

                diesel::insert_into(watch_runs::table)
                    .values((
                        watch_runs::id.eq(&run.id),
                        watch_runs::org_id.eq(&run.org_id),
                        watch_runs::watch_id.eq(&run.watch_id),
                        watch_runs::status.eq(run.status.as_str()),
                        watch_runs::started_at.eq(run.started_at.to_rfc3339()),
                    ))
                    .execute(conn)
                    .await?;

                Ok(Some(run))
            })
        })
        .await
    }

    /// Close a run with its terminal status and counters.
    pub async fn complete(
        &self,
        run_id: &str,
        status: RunStatus,
        stats: RunStats,
        error_message: Option<&str>,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(watch_runs::table.find(run_id))
            .set((
                watch_runs::status.eq(status.as_str()),
                watch_runs::completed_at.eq(Some(Utc::now().to_rfc3339())),
                watch_runs::entities_found.eq(Some(stats.found as i32)),
                watch_runs::entities_new.eq(Some(stats.new as i32)),
                watch_runs::entities_changed.eq(Some(stats.changed as i32)),
                watch_runs::entities_removed.eq(Some(stats.removed as i32)),
                watch_runs::events_emitted.eq(Some(stats.events as i32)),
                watch_runs::error_message.eq(error_message),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Get a run by ID.
    pub async fn get(&self, id: &str) -> Result<Option<WatchRun>, DieselError> {
        let mut conn = self.pool.get().await?;

        watch_runs::table
            .find(id)
            .first::<WatchRunRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(WatchRun::from))
    }

    /// Recent runs for a watch, newest first.
    pub async fn recent_for_watch(
        &self,
        watch_id: &str,
        limit: u32,
    ) -> Result<Vec<WatchRun>, DieselError> {
        let mut conn = self.pool.get().await?;

        watch_runs::table
            .filter(watch_runs::watch_id.eq(watch_id))
            .order(watch_runs::started_at.desc())
            .limit(limit as i64)
            .load::<WatchRunRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(WatchRun::from).collect())
    }

    /// Whether a run is currently in `running` state for the watch.
    pub async fn has_running(&self, watch_id: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        let running: i64 = watch_runs::table
            .filter(watch_runs::watch_id.eq(watch_id))
            .filter(watch_runs::status.eq(RunStatus::Running.as_str()))
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(running > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Watch;
    use crate::repository::DbContext;
    use tempfile::tempdir;

    async fn setup() -> (DbContext, String, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();

        let watch = Watch::new(
            "default".into(),
            "w".into(),
            "https://example.com".into(),
            "product".into(),
            serde_json::json!({}),
            "0 * * * *".into(),
            vec!["id".into()],
        );
        ctx.watches().save(&watch).await.unwrap();
        (ctx, watch.id, dir)
    }

    #[tokio::test]
    async fn test_one_running_run_per_watch() {
        let (ctx, watch_id, _dir) = setup().await;
        let repo = ctx.runs();

        let first = repo.try_start("default", &watch_id).await.unwrap();
        assert!(first.is_some());
        assert!(repo.has_running(&watch_id).await.unwrap());

        // Second claim is rejected while the first is still running.
        let second = repo.try_start("default", &watch_id).await.unwrap();
        assert!(second.is_none());

        let run = first.unwrap();
        repo.complete(&run.id, RunStatus::Completed, RunStats::default(), None)
            .await
            .unwrap();
        assert!(!repo.has_running(&watch_id).await.unwrap());

        // Claimable again after the first run closed.
        assert!(repo.try_start("default", &watch_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_complete_records_stats_and_error() {
        let (ctx, watch_id, _dir) = setup().await;
        let repo = ctx.runs();

        let run = repo.try_start("default", &watch_id).await.unwrap().unwrap();
        let stats = RunStats {
            found: 10,
            new: 2,
            changed: 1,
            removed: 3,
            events: 6,
        };
        repo.complete(&run.id, RunStatus::Failed, stats, Some("worker timeout"))
            .await
            .unwrap();

        let closed = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(closed.status, RunStatus::Failed);
        assert_eq!(closed.entities_found, Some(10));
        assert_eq!(closed.events_emitted, Some(6));
        assert_eq!(closed.error_message.as_deref(), Some("worker timeout"));
        assert!(closed.completed_at.is_some());

        let recent = repo.recent_for_watch(&watch_id, 5).await.unwrap();
        assert_eq!(recent.len(), 1);
    }
}
