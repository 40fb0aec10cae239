use autoshop_core::AggregateId;

/// Intent addressed to exactly one aggregate.
///
/// A command is either turned into events or rejected; it is never stored.
/// Because it names its target, the store can serialise writers per aggregate
/// while commands for different aggregates run side by side.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
