//! Event model: immutable facts about entity appearances, changes, and
//! disappearances. Events are append-only and never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::Record;

/// The kind of change an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EntityAppeared,
    EntityChanged,
    EntityDisappeared,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityAppeared => "entity_appeared",
            Self::EntityChanged => "entity_changed",
            Self::EntityDisappeared => "entity_disappeared",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "entity_appeared" => Some(Self::EntityAppeared),
            "entity_changed" => Some(Self::EntityChanged),
            "entity_disappeared" => Some(Self::EntityDisappeared),
            _ => None,
        }
    }
}

/// A change in a single field of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

/// Denormalized event payload: the entity snapshot plus, for change
/// events, the field-level diff. Carries everything the matcher needs
/// without re-querying the entity store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    pub entity: Record,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
}

/// An immutable domain event produced by one watch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub org_id: String,
    pub kind: EventKind,
    pub watch_id: String,
    pub watch_run_id: Option<String>,
    /// Affected entity row; None for disappearances after entity cleanup.
    pub entity_id: Option<String>,
    pub payload: EventPayload,
    pub occurred_at: DateTime<Utc>,
}
