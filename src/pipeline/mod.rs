//! Run pipeline stages: event emission and subscription matching.

pub mod emitter;
pub mod matcher;

pub use emitter::EventEmitter;
pub use matcher::SubscriptionMatcher;
