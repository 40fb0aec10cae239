use chrono::{DateTime, Utc};

/// A fact that happened to an aggregate.
///
/// Events are immutable and append-only; `event_type` + `version` identify the
/// payload schema when reading it back from the log.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name, e.g. `"service_order.budget_generated"`.
    fn event_type(&self) -> &'static str;

    /// Schema version of this event type.
    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
