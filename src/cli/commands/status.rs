//! Status command: row counts and recent runs.

use console::style;

use crate::config::Settings;
use crate::models::{DeliveryStatus, EntityStatus, RunStatus};

use super::db_context;

pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let ctx = db_context(settings);

    let watches = ctx.watches().get_all().await?;
    let events = ctx.events().count().await?;
    let deliveries = ctx.deliveries();

    println!("{}", style("pagewatch status").bold());
    println!("  watches: {}", watches.len());

    let mut active_entities = 0u64;
    let mut removed_entities = 0u64;
    for watch in &watches {
        active_entities += ctx
            .entities()
            .count_by_status(&watch.id, EntityStatus::Active)
            .await?;
        removed_entities += ctx
            .entities()
            .count_by_status(&watch.id, EntityStatus::Removed)
            .await?;
    }
    println!(
        "  entities: {} active, {} removed",
        active_entities, removed_entities
    );
    println!("  events: {}", events);
    println!(
        "  deliveries: {} pending, {} delivered, {} failed",
        deliveries.count_by_status(DeliveryStatus::Pending).await?,
        deliveries.count_by_status(DeliveryStatus::Delivered).await?,
        deliveries.count_by_status(DeliveryStatus::Failed).await?,
    );

    for watch in &watches {
        let runs = ctx.runs().recent_for_watch(&watch.id, 3).await?;
        if runs.is_empty() {
            continue;
        }
        println!("\n  {} ({})", style(&watch.name).bold(), watch.id);
        for run in runs {
            let status = match run.status {
                RunStatus::Completed => style(run.status.as_str()).green(),
                RunStatus::Running => style(run.status.as_str()).yellow(),
                RunStatus::Failed => style(run.status.as_str()).red(),
            };
            let counters = match (run.entities_found, run.events_emitted) {
                (Some(found), Some(events)) => {
                    format!("{found} entities, {events} events")
                }
                _ => String::new(),
            };
            println!(
                "    {}  {:<9}  {}  {}",
                run.started_at.format("%Y-%m-%d %H:%M UTC"),
                status,
                counters,
                run.error_message.as_deref().unwrap_or("")
            );
        }
    }

    Ok(())
}
