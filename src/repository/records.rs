//! Diesel ORM records for database tables.
//!
//! These provide compile-time type checking for database operations.
//! Conversion to domain models lives next to each repository.

use diesel::prelude::*;

use crate::schema;

/// Watch record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::watches)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WatchRecord {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub url: String,
    pub schema_type: String,
    pub extraction_rules: String,
    pub schedule: String,
    pub identity_fields: String,
    pub status: String,
    pub next_run_at: String,
    pub consecutive_failures: i32,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

/// Watch run record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::watch_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WatchRunRecord {
    pub id: String,
    pub org_id: String,
    pub watch_id: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub entities_found: Option<i32>,
    pub entities_new: Option<i32>,
    pub entities_changed: Option<i32>,
    pub entities_removed: Option<i32>,
    pub events_emitted: Option<i32>,
    pub error_message: Option<String>,
}

/// Entity record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::entities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityRecord {
    pub id: String,
    pub org_id: String,
    pub watch_id: String,
    pub schema_type: String,
    pub external_id: String,
    pub content: String,
    pub status: String,
    pub first_seen_at: String,
    pub last_seen_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Event record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventRecord {
    pub id: String,
    pub org_id: String,
    pub event_type: String,
    pub watch_id: String,
    pub watch_run_id: Option<String>,
    pub entity_id: Option<String>,
    pub payload: String,
    pub occurred_at: String,
}

/// Subscription record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::subscriptions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SubscriptionRecord {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub event_types: String,
    pub watch_id: Option<String>,
    pub filters: String,
    pub channel_type: String,
    pub channel_config: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

/// Delivery record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::deliveries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeliveryRecord {
    pub id: String,
    pub org_id: String,
    pub event_id: String,
    pub subscription_id: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: String,
    pub last_error: Option<String>,
    pub delivered_at: Option<String>,
    pub created_at: String,
}
