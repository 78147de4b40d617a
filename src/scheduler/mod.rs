//! Watch scheduler: polls for due watches and executes them.

pub mod executor;

pub use executor::{RunError, RunExecutor, TriggerOutcome};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::repository::DbContext;

/// Polls the watch table and dispatches due watches to the executor,
/// bounded by a worker semaphore.
pub struct Scheduler {
    db: DbContext,
    executor: Arc<RunExecutor>,
    poll_interval: Duration,
    max_concurrent: usize,
}

impl Scheduler {
    pub fn new(
        db: DbContext,
        executor: Arc<RunExecutor>,
        poll_interval: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            db,
            executor,
            poll_interval,
            max_concurrent,
        }
    }

    /// Run the poll loop forever. The first pass happens immediately.
    pub async fn run(&self) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            workers = self.max_concurrent,
            "scheduler started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick().await {
                error!(error = %err, "scheduler pass failed");
            }
        }
    }

    /// One scheduling pass: execute everything currently due.
    pub async fn tick(&self) -> Result<usize, crate::repository::pool::DieselError> {
        let due = self.db.watches().due(Utc::now()).await?;
        if due.is_empty() {
            debug!("no watches due");
            return Ok(0);
        }

        info!(due = due.len(), "executing due watches");
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(due.len());

        for watch in due {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let executor = self.executor.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = executor.execute(&watch).await {
                    error!(watch_id = %watch.id, error = %err, "watch execution failed");
                }
            }));
        }

        let count = handles.len();
        futures::future::join_all(handles).await;
        Ok(count)
    }
}
