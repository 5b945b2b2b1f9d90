use chrono::{DateTime, Utc};

/// A domain event.
///
/// Events are immutable facts describing a committed ledger change.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "stock.reserved").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the change happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Business key the event is about (SKU, reservation id, transfer number).
    fn subject(&self) -> String;
}
