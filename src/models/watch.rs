//! Watch models: recurring monitoring jobs and their runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scheduling status of a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    /// Eligible for scheduling.
    Active,
    /// Excluded from scheduling until resumed.
    Paused,
    /// Tripped the consecutive-failure ceiling; excluded until resumed.
    Error,
}

impl WatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A recurring monitoring job: one URL, one set of extraction rules,
/// one cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watch {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub url: String,
    /// Schema type of the entities this watch extracts (e.g. "product").
    pub schema_type: String,
    /// Extraction rules passed opaquely to the extraction worker.
    pub extraction_rules: serde_json::Value,
    /// Cron expression (minute hour dom month dow).
    pub schedule: String,
    /// Ordered field names whose values derive the entity external id.
    pub identity_fields: Vec<String>,
    pub status: WatchStatus,
    pub next_run_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Watch {
    /// Create a new active watch due immediately.
    pub fn new(
        org_id: String,
        name: String,
        url: String,
        schema_type: String,
        extraction_rules: serde_json::Value,
        schedule: String,
        identity_fields: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            org_id,
            name,
            url,
            schema_type,
            extraction_rules,
            schedule,
            identity_fields,
            status: WatchStatus::Active,
            next_run_at: now,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Terminal status of a watch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One execution of a watch. The unit of idempotency for a scheduling
/// cycle: at most one run per watch may be running at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRun {
    pub id: String,
    pub org_id: String,
    pub watch_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub entities_found: Option<u32>,
    pub entities_new: Option<u32>,
    pub entities_changed: Option<u32>,
    pub entities_removed: Option<u32>,
    pub events_emitted: Option<u32>,
    pub error_message: Option<String>,
}

/// Per-run counters reported when a run closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub found: u32,
    pub new: u32,
    pub changed: u32,
    pub removed: u32,
    pub events: u32,
}
