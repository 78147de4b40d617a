//! Watch repository.
//!
//! Owns the watch configuration rows and their scheduling fields
//! (next_run_at, consecutive_failures, status).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::WatchRecord;
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{Watch, WatchStatus};
use crate::schema::watches;

impl From<WatchRecord> for Watch {
    fn from(record: WatchRecord) -> Self {
        Watch {
            id: record.id,
            org_id: record.org_id,
            name: record.name,
            url: record.url,
            schema_type: record.schema_type,
            extraction_rules: serde_json::from_str(&record.extraction_rules)
                .unwrap_or(serde_json::Value::Null),
            schedule: record.schedule,
            identity_fields: serde_json::from_str(&record.identity_fields).unwrap_or_default(),
            status: WatchStatus::from_str(&record.status).unwrap_or(WatchStatus::Paused),
            next_run_at: parse_datetime(&record.next_run_at),
            consecutive_failures: record.consecutive_failures.max(0) as u32,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
            deleted_at: parse_datetime_opt(record.deleted_at),
        }
    }
}

/// Diesel-based watch repository.
#[derive(Clone)]
pub struct WatchRepository {
    pool: AsyncSqlitePool,
}

impl WatchRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Get a watch by ID (including soft-deleted ones).
    pub async fn get(&self, id: &str) -> Result<Option<Watch>, DieselError> {
        let mut conn = self.pool.get().await?;

        watches::table
            .find(id)
            .first::<WatchRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Watch::from))
    }

    /// Get all watches that are not soft-deleted.
    pub async fn get_all(&self) -> Result<Vec<Watch>, DieselError> {
        let mut conn = self.pool.get().await?;

        watches::table
            .filter(watches::deleted_at.is_null())
            .order(watches::created_at.asc())
            .load::<WatchRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Watch::from).collect())
    }

    /// Get all active watches whose next run is due.
    ///
    /// Per-watch run exclusivity is not checked here; the run claim in
    /// `RunRepository::try_start` is the mutual-exclusion boundary.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Watch>, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = now.to_rfc3339();

        watches::table
            .filter(watches::deleted_at.is_null())
            .filter(watches::status.eq(WatchStatus::Active.as_str()))
            .filter(watches::next_run_at.le(&now))
            .order(watches::next_run_at.asc())
            .load::<WatchRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Watch::from).collect())
    }

    /// Save a watch (insert or update).
    pub async fn save(&self, watch: &Watch) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        let extraction_rules = watch.extraction_rules.to_string();
        let identity_fields = serde_json::to_string(&watch.identity_fields)
            .unwrap_or_else(|_| "[]".to_string());
        let next_run_at = watch.next_run_at.to_rfc3339();
        let created_at = watch.created_at.to_rfc3339();
        let updated_at = watch.updated_at.to_rfc3339();
        let deleted_at = watch.deleted_at.map(|dt| dt.to_rfc3339());

        diesel::replace_into(watches::table)
            .values((
                watches::id.eq(&watch.id),
                watches::org_id.eq(&watch.org_id),
                watches::name.eq(&watch.name),
                watches::url.eq(&watch.url),
                watches::schema_type.eq(&watch.schema_type),
                watches::extraction_rules.eq(&extraction_rules),
                watches::schedule.eq(&watch.schedule),
                watches::identity_fields.eq(&identity_fields),
                watches::status.eq(watch.status.as_str()),
                watches::next_run_at.eq(&next_run_at),
                watches::consecutive_failures.eq(watch.consecutive_failures as i32),
                watches::created_at.eq(&created_at),
                watches::updated_at.eq(&updated_at),
                watches::deleted_at.eq(&deleted_at),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Update scheduling state after a run closed.
    pub async fn update_after_run(
        &self,
        id: &str,
        next_run_at: DateTime<Utc>,
        consecutive_failures: u32,
        status: WatchStatus,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(watches::table.find(id))
            .set((
                watches::next_run_at.eq(next_run_at.to_rfc3339()),
                watches::consecutive_failures.eq(consecutive_failures as i32),
                watches::status.eq(status.as_str()),
                watches::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Set a watch's status without touching scheduling fields.
    pub async fn set_status(&self, id: &str, status: WatchStatus) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;

        let rows = diesel::update(watches::table.find(id))
            .set((
                watches::status.eq(status.as_str()),
                watches::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }

    /// Resume a paused or errored watch: clears the failure counter and
    /// makes it immediately eligible for scheduling.
    pub async fn resume(&self, id: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        let rows = diesel::update(watches::table.find(id))
            .set((
                watches::status.eq(WatchStatus::Active.as_str()),
                watches::consecutive_failures.eq(0),
                watches::next_run_at.eq(&now),
                watches::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }

    /// Soft-delete a watch.
    pub async fn soft_delete(&self, id: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        let rows = diesel::update(watches::table.find(id))
            .set((
                watches::deleted_at.eq(Some(&now)),
                watches::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DbContext;
    use chrono::Duration;
    use tempfile::tempdir;

    async fn setup() -> (DbContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (ctx, dir)
    }

    fn sample_watch(name: &str) -> Watch {
        Watch::new(
            "default".into(),
            name.into(),
            "https://example.com/listing".into(),
            "product".into(),
            serde_json::json!({"selector": ".item"}),
            "*/30 * * * *".into(),
            vec!["sku".into()],
        )
    }

    #[tokio::test]
    async fn test_watch_crud_and_due() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.watches();

        let watch = sample_watch("price watch");
        repo.save(&watch).await.unwrap();

        let fetched = repo.get(&watch.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "price watch");
        assert_eq!(fetched.identity_fields, vec!["sku".to_string()]);
        assert_eq!(fetched.status, WatchStatus::Active);

        // Due immediately after creation.
        let due = repo.due(Utc::now() + Duration::seconds(1)).await.unwrap();
        assert_eq!(due.len(), 1);

        // Paused watches are not due.
        repo.set_status(&watch.id, WatchStatus::Paused).await.unwrap();
        assert!(repo.due(Utc::now()).await.unwrap().is_empty());

        // Resume restores immediate eligibility and clears failures.
        repo.resume(&watch.id).await.unwrap();
        let resumed = repo.get(&watch.id).await.unwrap().unwrap();
        assert_eq!(resumed.status, WatchStatus::Active);
        assert_eq!(resumed.consecutive_failures, 0);

        // Soft delete removes it from listings and scheduling.
        repo.soft_delete(&watch.id).await.unwrap();
        assert!(repo.get_all().await.unwrap().is_empty());
        assert!(repo
            .due(Utc::now() + Duration::seconds(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_after_run_moves_next_due() {
        let (ctx, _dir) = setup().await;
        let repo = ctx.watches();

        let watch = sample_watch("due shift");
        repo.save(&watch).await.unwrap();

        let later = Utc::now() + Duration::minutes(30);
        repo.update_after_run(&watch.id, later, 2, WatchStatus::Active)
            .await
            .unwrap();

        let fetched = repo.get(&watch.id).await.unwrap().unwrap();
        assert_eq!(fetched.consecutive_failures, 2);
        assert!(fetched.next_run_at > Utc::now());
        assert!(repo.due(Utc::now()).await.unwrap().is_empty());
    }
}
