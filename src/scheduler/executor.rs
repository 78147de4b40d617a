//! Run executor: drives one watch run end to end.
//!
//! extraction -> identity keying -> diff -> event emission -> matching,
//! with the run row claimed first so concurrent schedulers (or a manual
//! trigger racing the poll loop) never execute the same watch twice.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::diff;
use crate::extract::{ExtractError, ExtractionRequest, ExtractionWorker};
use crate::models::{RunStats, RunStatus, Watch, WatchStatus};
use crate::pipeline::{EventEmitter, SubscriptionMatcher};
use crate::repository::pool::DieselError;
use crate::repository::DbContext;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("database error: {0}")]
    Db(#[from] DieselError),
}

impl RunError {
    /// Configuration failures cannot recover on retry; the watch goes
    /// straight to error status instead of burning through the ceiling.
    fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Outcome of asking for a run outside the normal schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A run was claimed and is executing.
    Accepted { run_id: String },
    /// A run for this watch is already in flight.
    AlreadyRunning,
    /// The watch is paused or in error status.
    NotSchedulable,
    /// The watch is deleted or otherwise unknown.
    NotFound,
}

pub struct RunExecutor {
    db: DbContext,
    worker: Arc<dyn ExtractionWorker>,
    emitter: EventEmitter,
    matcher: SubscriptionMatcher,
    run_timeout: Duration,
    failure_ceiling: u32,
}

impl RunExecutor {
    pub fn new(
        db: DbContext,
        worker: Arc<dyn ExtractionWorker>,
        run_timeout: Duration,
        failure_ceiling: u32,
    ) -> Self {
        let emitter = EventEmitter::new(db.pool().clone());
        let matcher = SubscriptionMatcher::new(&db);
        Self {
            db,
            worker,
            emitter,
            matcher,
            run_timeout,
            failure_ceiling,
        }
    }

    /// Execute one watch if no run is already in flight.
    ///
    /// Returns the run id when a run was claimed, None when skipped.
    pub async fn execute(&self, watch: &Watch) -> Result<Option<String>, DieselError> {
        let run = match self.db.runs().try_start(&watch.org_id, &watch.id).await? {
            Some(run) => run,
            None => {
                info!(watch_id = %watch.id, "run already in flight, skipping");
                return Ok(None);
            }
        };

        info!(watch_id = %watch.id, run_id = %run.id, url = %watch.url, "run started");

        match self.run_pipeline(watch, &run.id).await {
            Ok(stats) => {
                self.db
                    .runs()
                    .complete(&run.id, RunStatus::Completed, stats, None)
                    .await?;
                self.reschedule(watch, None).await?;
                info!(
                    watch_id = %watch.id,
                    run_id = %run.id,
                    found = stats.found,
                    new = stats.new,
                    changed = stats.changed,
                    removed = stats.removed,
                    events = stats.events,
                    "run completed"
                );
            }
            Err(err) => {
                let message = err.to_string();
                error!(watch_id = %watch.id, run_id = %run.id, error = %message, "run failed");
                self.db
                    .runs()
                    .complete(&run.id, RunStatus::Failed, RunStats::default(), Some(&message))
                    .await?;
                self.reschedule(watch, Some(&err)).await?;
            }
        }

        Ok(Some(run.id))
    }

    /// Run a watch on demand, bypassing next_run_at but not the
    /// single-run-per-watch claim.
    pub async fn trigger(&self, watch_id: &str) -> Result<TriggerOutcome, DieselError> {
        let watch = match self.db.watches().get(watch_id).await? {
            Some(watch) => watch,
            None => return Ok(TriggerOutcome::NotFound),
        };

        if watch.status != WatchStatus::Active {
            return Ok(TriggerOutcome::NotSchedulable);
        }

        if self.db.runs().has_running(&watch.id).await? {
            return Ok(TriggerOutcome::AlreadyRunning);
        }

        match self.execute(&watch).await? {
            Some(run_id) => Ok(TriggerOutcome::Accepted { run_id }),
            None => Ok(TriggerOutcome::AlreadyRunning),
        }
    }

    async fn run_pipeline(&self, watch: &Watch, run_id: &str) -> Result<RunStats, RunError> {
        let run = self
            .db
            .runs()
            .get(run_id)
            .await?
            .ok_or_else(|| RunError::Configuration("run row vanished".to_string()))?;

        let request = ExtractionRequest {
            org_id: watch.org_id.clone(),
            url: watch.url.clone(),
            schema_type: watch.schema_type.clone(),
            extraction_rules: watch.extraction_rules.clone(),
        };

        let records = tokio::time::timeout(self.run_timeout, self.worker.extract(&request))
            .await
            .map_err(|_| RunError::Timeout(self.run_timeout))??;

        if watch.identity_fields.is_empty() {
            return Err(RunError::Configuration(
                "watch has no identity fields".to_string(),
            ));
        }

        let found = records.len() as u32;
        let batch = diff::key_batch(records, &watch.identity_fields);
        if batch.dropped > 0 {
            warn!(
                watch_id = %watch.id,
                dropped = batch.dropped,
                "records without resolvable identity skipped"
            );
        }
        if batch.collisions > 0 {
            warn!(
                watch_id = %watch.id,
                collisions = batch.collisions,
                "duplicate identities in batch, last record wins"
            );
        }

        let stored = self.db.entities().snapshot_for_watch(&watch.id).await?;
        let result = diff::diff(&stored, &batch);

        let stats = RunStats {
            found,
            new: result.appeared.len() as u32,
            changed: result.changed.len() as u32,
            removed: result.disappeared.len() as u32,
            events: (result.appeared.len() + result.changed.len() + result.disappeared.len())
                as u32,
        };

        let events = self.emitter.apply(watch, &run, &stored, &result).await?;
        self.matcher.match_events(&events).await?;

        Ok(stats)
    }

    /// Advance scheduling state after a run closes.
    ///
    /// Success resets the failure streak. A failure increments it, and
    /// hitting the ceiling (or any configuration failure) parks the
    /// watch in error status until an operator resumes it.
    async fn reschedule(&self, watch: &Watch, failure: Option<&RunError>) -> Result<(), DieselError> {
        let next = match next_run(&watch.schedule, Utc::now()) {
            Ok(next) => next,
            Err(message) => {
                warn!(watch_id = %watch.id, error = %message, "unschedulable cron expression");
                self.db
                    .watches()
                    .update_after_run(
                        &watch.id,
                        watch.next_run_at,
                        watch.consecutive_failures + 1,
                        WatchStatus::Error,
                    )
                    .await?;
                return Ok(());
            }
        };

        match failure {
            None => {
                self.db
                    .watches()
                    .update_after_run(&watch.id, next, 0, WatchStatus::Active)
                    .await
            }
            Some(err) => {
                let failures = watch.consecutive_failures + 1;
                let status = if err.is_configuration() || failures >= self.failure_ceiling {
                    warn!(
                        watch_id = %watch.id,
                        failures,
                        "watch moved to error status"
                    );
                    WatchStatus::Error
                } else {
                    WatchStatus::Active
                };
                self.db
                    .watches()
                    .update_after_run(&watch.id, next, failures, status)
                    .await
            }
        }
    }
}

/// Next fire time for a five-field cron expression, strictly after `after`.
pub fn next_run(schedule: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    // The parser wants a seconds field; watches store standard five-field
    // expressions.
    let with_seconds = format!("0 {}", schedule.trim());
    let parsed = cron::Schedule::from_str(&with_seconds).map_err(|e| e.to_string())?;
    parsed
        .after(&after)
        .next()
        .ok_or_else(|| format!("schedule '{schedule}' has no future fire time"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_run_hourly() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap();
        let next = next_run("0 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_every_five_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 10, 2, 30).unwrap();
        let next = next_run("*/5 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn test_next_run_rejects_garbage() {
        assert!(next_run("not a schedule", Utc::now()).is_err());
        assert!(next_run("99 99 * * *", Utc::now()).is_err());
    }
}
