//! The `run` command: scheduler, delivery dispatcher, and API server.

use std::sync::Arc;

use console::style;

use crate::config::Settings;
use crate::dispatch::DeliveryProcessor;
use crate::extract::HttpExtractionWorker;
use crate::scheduler::{RunExecutor, Scheduler};
use crate::server::{self, AppState};

use super::db_context;

pub async fn cmd_run(settings: &Settings) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.data_dir)?;

    let ctx = db_context(settings);
    ctx.init_schema().await?;

    let worker = Arc::new(HttpExtractionWorker::new(
        settings.worker_url.clone(),
        settings.worker_api_key.clone(),
    ));
    let executor = Arc::new(RunExecutor::new(
        ctx.clone(),
        worker,
        settings.run_timeout(),
        settings.failure_ceiling,
    ));

    let scheduler = Scheduler::new(
        ctx.clone(),
        executor.clone(),
        settings.poll_interval(),
        settings.max_concurrent_runs,
    );
    let dispatcher = Arc::new(DeliveryProcessor::new(
        ctx.clone(),
        settings.sweep_interval(),
        settings.retry_base(),
        settings.max_concurrent_deliveries,
    ));

    println!(
        "{} pagewatch running (api {}, worker {})",
        style("✓").green(),
        settings.listen_addr,
        settings.worker_url
    );

    let state = AppState {
        db: ctx,
        executor: executor.clone(),
    };
    let listen_addr = settings.listen_addr.clone();

    tokio::select! {
        _ = scheduler.run() => {}
        _ = dispatcher.run() => {}
        result = server::serve(state, &listen_addr) => {
            result?;
        }
    }

    Ok(())
}
