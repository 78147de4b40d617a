//! Subscription management commands.

use anyhow::{bail, Context};
use console::style;

use crate::config::Settings;
use crate::filter::FilterSet;
use crate::models::{ChannelConfig, EventKind, Subscription, SubscriptionStatus};

use super::db_context;

pub async fn cmd_add(
    settings: &Settings,
    name: String,
    events: &[String],
    watch: Option<String>,
    filters: &str,
    channel: String,
    recipients: Vec<String>,
) -> anyhow::Result<()> {
    let mut event_kinds = Vec::with_capacity(events.len());
    for raw in events {
        match EventKind::from_str(raw) {
            Some(kind) => event_kinds.push(kind),
            None => bail!(
                "unknown event kind '{raw}' (expected entity_appeared, entity_changed, or entity_disappeared)"
            ),
        }
    }

    let filters: FilterSet = serde_json::from_str(filters).context("parsing --filters JSON")?;

    let sub = Subscription::new(
        settings.org_id.clone(),
        name,
        event_kinds,
        watch,
        filters,
        channel,
        ChannelConfig { to: recipients },
    );

    let ctx = db_context(settings);
    ctx.subscriptions().save(&sub).await?;

    println!(
        "{} Added subscription {} ({})",
        style("✓").green(),
        sub.name,
        sub.id
    );
    Ok(())
}

pub async fn cmd_list(settings: &Settings) -> anyhow::Result<()> {
    let ctx = db_context(settings);
    let subs = ctx.subscriptions().get_all().await?;

    if subs.is_empty() {
        println!("No subscriptions configured. Add one with `pagewatch sub add`.");
        return Ok(());
    }

    for sub in subs {
        let status = match sub.status {
            SubscriptionStatus::Active => style(sub.status.as_str()).green(),
            SubscriptionStatus::Paused => style(sub.status.as_str()).yellow(),
        };
        let kinds: Vec<&str> = sub.event_kinds.iter().map(|k| k.as_str()).collect();
        let scope = sub.watch_id.as_deref().unwrap_or("all watches");
        println!(
            "{}  {:<8}  [{}]  {}  {}",
            sub.id,
            status,
            kinds.join(", "),
            scope,
            sub.name
        );
        if !sub.filters.is_empty() {
            println!(
                "    {} condition(s): {}",
                sub.filters.conditions.len(),
                style(serde_json::to_string(&sub.filters).unwrap_or_default()).dim()
            );
        }
    }
    Ok(())
}

pub async fn cmd_pause(settings: &Settings, subscription_id: &str) -> anyhow::Result<()> {
    let ctx = db_context(settings);
    if ctx
        .subscriptions()
        .set_status(subscription_id, SubscriptionStatus::Paused)
        .await?
    {
        println!("{} Paused subscription {}", style("✓").green(), subscription_id);
    } else {
        bail!("subscription {subscription_id} not found");
    }
    Ok(())
}

pub async fn cmd_resume(settings: &Settings, subscription_id: &str) -> anyhow::Result<()> {
    let ctx = db_context(settings);
    if ctx
        .subscriptions()
        .set_status(subscription_id, SubscriptionStatus::Active)
        .await?
    {
        println!("{} Resumed subscription {}", style("✓").green(), subscription_id);
    } else {
        bail!("subscription {subscription_id} not found");
    }
    Ok(())
}

pub async fn cmd_remove(settings: &Settings, subscription_id: &str) -> anyhow::Result<()> {
    let ctx = db_context(settings);
    if ctx.subscriptions().soft_delete(subscription_id).await? {
        println!("{} Removed subscription {}", style("✓").green(), subscription_id);
    } else {
        bail!("subscription {subscription_id} not found");
    }
    Ok(())
}
