//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking
//! over SQLite. Concurrency control lives here: run claims and delivery
//! claims are short transactions, not in-process locks, so exclusivity
//! survives process restarts.

pub mod context;
pub mod pool;
pub mod records;

pub mod delivery;
pub mod entity;
pub mod event;
pub mod run;
pub mod subscription;
pub mod watch;

pub use context::DbContext;
pub use delivery::DeliveryRepository;
pub use entity::EntityRepository;
pub use event::EventRepository;
pub use pool::{AsyncSqlitePool, DieselError};
pub use run::RunRepository;
pub use subscription::SubscriptionRepository;
pub use watch::WatchRepository;

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
