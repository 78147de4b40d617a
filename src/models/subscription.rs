//! Subscription model: a standing interest registration that turns
//! matched events into deliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::EventKind;
use crate::filter::FilterSet;

/// Whether a subscription participates in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Channel configuration: where matched events get delivered.
///
/// The transport itself is behind the `ChannelSender` trait; this only
/// carries the recipient list (webhook URLs or addresses).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub to: Vec<String>,
}

/// A standing filter + channel registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub org_id: String,
    pub name: String,
    /// Event kinds this subscription cares about.
    pub event_kinds: Vec<EventKind>,
    /// Scope to a single watch; None means all watches.
    pub watch_id: Option<String>,
    /// Conjunction of field conditions; empty always matches.
    pub filters: FilterSet,
    pub channel_type: String,
    pub channel_config: ChannelConfig,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Create a new active subscription.
    pub fn new(
        org_id: String,
        name: String,
        event_kinds: Vec<EventKind>,
        watch_id: Option<String>,
        filters: FilterSet,
        channel_type: String,
        channel_config: ChannelConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            org_id,
            name,
            event_kinds,
            watch_id,
            filters,
            channel_type,
            channel_config,
            status: SubscriptionStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}
