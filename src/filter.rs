//! Subscription filter conditions and their evaluation.
//!
//! Filters are a conjunction of closed, tagged conditions evaluated as a
//! pure function over an event payload. No reflection, no I/O; every
//! input has a defined answer.

use serde::{Deserialize, Serialize};

use crate::models::{EventKind, EventPayload};

/// A single filter condition, tagged by operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum Condition {
    /// New value of the field equals the literal.
    Eq {
        field: String,
        value: serde_json::Value,
    },
    /// Field is present in the event's change list.
    Changed { field: String },
    /// Field changed and its value increased numerically.
    Increased { field: String },
    /// Field changed and its value decreased numerically.
    Decreased { field: String },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. }
            | Self::Changed { field }
            | Self::Increased { field }
            | Self::Decreased { field } => field,
        }
    }
}

/// A conjunction of conditions. Empty always matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate the full conjunction against an event.
    ///
    /// Disappearance events match unconditionally: there is no new value
    /// to test, and subscribers asking for disappearances want all of
    /// them.
    pub fn matches(&self, kind: EventKind, payload: &EventPayload) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        if kind == EventKind::EntityDisappeared {
            return true;
        }
        self.conditions.iter().all(|c| evaluate(kind, payload, c))
    }
}

/// Evaluate one condition against one event payload.
fn evaluate(kind: EventKind, payload: &EventPayload, condition: &Condition) -> bool {
    match kind {
        EventKind::EntityChanged => evaluate_changed(payload, condition),
        EventKind::EntityAppeared => evaluate_appeared(payload, condition),
        EventKind::EntityDisappeared => true,
    }
}

/// Change events test against the payload's change list. A condition on a
/// field that did not change fails the direction operators and `changed`;
/// `eq` also only looks at changed fields here, since the full entity is
/// available on appearance events.
fn evaluate_changed(payload: &EventPayload, condition: &Condition) -> bool {
    let Some(change) = payload
        .changes
        .iter()
        .find(|c| c.field == condition.field())
    else {
        return false;
    };

    match condition {
        Condition::Changed { .. } => true,
        Condition::Eq { value, .. } => values_loosely_equal(&change.new, value),
        Condition::Increased { .. } => numeric_pair(&change.old, &change.new)
            .map(|(old, new)| new > old)
            .unwrap_or(false),
        Condition::Decreased { .. } => numeric_pair(&change.old, &change.new)
            .map(|(old, new)| new < old)
            .unwrap_or(false),
    }
}

/// Appearance events have no old value: direction operators pass
/// vacuously (a new entity is a change from nothing), `eq` checks the
/// entity snapshot.
fn evaluate_appeared(payload: &EventPayload, condition: &Condition) -> bool {
    match condition {
        Condition::Changed { .. } | Condition::Increased { .. } | Condition::Decreased { .. } => {
            true
        }
        Condition::Eq { field, value } => payload
            .entity
            .get(field)
            .map(|v| values_loosely_equal(v, value))
            .unwrap_or(false),
    }
}

/// Parse a JSON value as f64 where it makes numeric sense, including
/// numeric strings (extraction output is often stringly typed).
fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn numeric_pair(old: &serde_json::Value, new: &serde_json::Value) -> Option<(f64, f64)> {
    Some((as_number(old)?, as_number(new)?))
}

/// Equality for `eq` literals: numeric when both sides parse as numbers,
/// trimmed string comparison otherwise.
fn values_loosely_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(a), as_number(b)) {
        return a == b;
    }
    match (a, b) {
        (serde_json::Value::String(a), serde_json::Value::String(b)) => a.trim() == b.trim(),
        _ => a == b,
    }
}
