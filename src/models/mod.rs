//! Data models for pagewatch.

mod delivery;
mod entity;
mod event;
mod subscription;
mod watch;

pub use delivery::{Delivery, DeliveryStatus, DEFAULT_MAX_ATTEMPTS};
pub use entity::{Entity, EntityStatus, Record};
pub use event::{Event, EventKind, EventPayload, FieldChange};
pub use subscription::{ChannelConfig, Subscription, SubscriptionStatus};
pub use watch::{RunStats, RunStatus, Watch, WatchRun, WatchStatus};
