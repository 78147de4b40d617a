//! Entity model: the latest known snapshot of one tracked item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured record as produced by the extraction worker.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Presence status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Present in the latest extraction.
    Active,
    /// Disappeared from the page; row kept for reappearance detection.
    Removed,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Removed => "removed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

/// Latest known observation of one real-world item discovered by a watch.
///
/// Keyed by (org, watch, schema type, external id); the external id is
/// derived deterministically from the watch's identity fields and is the
/// sole diff correlation key. Mutated only by the event emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub org_id: String,
    pub watch_id: String,
    pub schema_type: String,
    pub external_id: String,
    pub content: Record,
    pub status: EntityStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
