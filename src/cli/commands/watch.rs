//! Watch management commands.

use std::sync::Arc;

use anyhow::{bail, Context};
use console::style;

use crate::config::Settings;
use crate::extract::HttpExtractionWorker;
use crate::models::{Watch, WatchStatus};
use crate::scheduler::{executor::next_run, RunExecutor, TriggerOutcome};

use super::db_context;

pub async fn cmd_add(
    settings: &Settings,
    name: String,
    url: String,
    schedule: String,
    schema_type: String,
    identity_fields: Vec<String>,
    rules: &str,
) -> anyhow::Result<()> {
    // Reject unschedulable configuration up front rather than letting the
    // scheduler park the watch in error status on its first pass.
    if let Err(err) = next_run(&schedule, chrono::Utc::now()) {
        bail!("invalid schedule '{schedule}': {err}");
    }
    if identity_fields.iter().all(|f| f.trim().is_empty()) {
        bail!("at least one non-empty identity field is required");
    }
    let parsed = url::Url::parse(&url).with_context(|| format!("invalid url '{url}'"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("url must be http or https");
    }

    let extraction_rules: serde_json::Value =
        serde_json::from_str(rules).context("parsing --rules JSON")?;

    let watch = Watch::new(
        settings.org_id.clone(),
        name,
        url,
        schema_type,
        extraction_rules,
        schedule,
        identity_fields,
    );

    let ctx = db_context(settings);
    ctx.watches().save(&watch).await?;

    println!("{} Added watch {} ({})", style("✓").green(), watch.name, watch.id);
    Ok(())
}

pub async fn cmd_list(settings: &Settings) -> anyhow::Result<()> {
    let ctx = db_context(settings);
    let watches = ctx.watches().get_all().await?;

    if watches.is_empty() {
        println!("No watches configured. Add one with `pagewatch watch add`.");
        return Ok(());
    }

    for watch in watches {
        let status = match watch.status {
            WatchStatus::Active => style(watch.status.as_str()).green(),
            WatchStatus::Paused => style(watch.status.as_str()).yellow(),
            WatchStatus::Error => style(watch.status.as_str()).red(),
        };
        println!(
            "{}  {:<8}  next {}  {}  {}",
            watch.id,
            status,
            watch.next_run_at.format("%Y-%m-%d %H:%M UTC"),
            watch.name,
            style(&watch.url).dim()
        );
        if watch.consecutive_failures > 0 {
            println!(
                "    {} {} consecutive failures",
                style("!").yellow(),
                watch.consecutive_failures
            );
        }
    }
    Ok(())
}

pub async fn cmd_pause(settings: &Settings, watch_id: &str) -> anyhow::Result<()> {
    let ctx = db_context(settings);
    if ctx.watches().set_status(watch_id, WatchStatus::Paused).await? {
        println!("{} Paused watch {}", style("✓").green(), watch_id);
    } else {
        bail!("watch {watch_id} not found");
    }
    Ok(())
}

pub async fn cmd_resume(settings: &Settings, watch_id: &str) -> anyhow::Result<()> {
    let ctx = db_context(settings);
    if ctx.watches().resume(watch_id).await? {
        println!(
            "{} Resumed watch {}; due immediately",
            style("✓").green(),
            watch_id
        );
    } else {
        bail!("watch {watch_id} not found");
    }
    Ok(())
}

pub async fn cmd_remove(settings: &Settings, watch_id: &str) -> anyhow::Result<()> {
    let ctx = db_context(settings);
    if ctx.watches().soft_delete(watch_id).await? {
        println!("{} Removed watch {}", style("✓").green(), watch_id);
    } else {
        bail!("watch {watch_id} not found");
    }
    Ok(())
}

pub async fn cmd_trigger(settings: &Settings, watch_id: &str) -> anyhow::Result<()> {
    let ctx = db_context(settings);
    let worker = Arc::new(HttpExtractionWorker::new(
        settings.worker_url.clone(),
        settings.worker_api_key.clone(),
    ));
    let executor = RunExecutor::new(
        ctx,
        worker,
        settings.run_timeout(),
        settings.failure_ceiling,
    );

    match executor.trigger(watch_id).await? {
        TriggerOutcome::Accepted { run_id } => {
            println!("{} Run {} finished", style("✓").green(), run_id);
        }
        TriggerOutcome::AlreadyRunning => {
            bail!("a run is already in flight for watch {watch_id}");
        }
        TriggerOutcome::NotSchedulable => {
            bail!("watch {watch_id} is not active; resume it first");
        }
        TriggerOutcome::NotFound => bail!("watch {watch_id} not found"),
    }
    Ok(())
}
