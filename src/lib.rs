//! pagewatch: watch web pages for structured changes and notify subscribers.
//!
//! A watch names a URL, extraction rules, and a cron schedule. Each run
//! asks the extraction worker for the page's current records, diffs them
//! against the stored entity snapshot, emits appearance/change/
//! disappearance events, matches those against subscriptions, and queues
//! deliveries that a dispatcher retries until delivered or exhausted.

pub mod cli;
pub mod config;
pub mod diff;
pub mod dispatch;
pub mod extract;
pub mod filter;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod scheduler;
pub mod schema;
pub mod server;
