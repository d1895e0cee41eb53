use chrono::{DateTime, Utc};

/// A domain event produced by an aggregate's `handle`.
///
/// Events are facts: immutable, versioned, and applied in order.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "bulk.order.payment_submitted").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
