//! Append-only event store boundary.
//!
//! Storage-agnostic stream abstraction plus decorators: `ProjectingEventStore`
//! feeds committed events to a read model inside the append call, and
//! `DeadlineEventStore` bounds how long any call may take.

pub mod deadline;
pub mod in_memory;
pub mod r#trait;

pub use deadline::DeadlineEventStore;
pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

use autoshop_core::{AggregateId, ExpectedVersion};
use tracing::warn;

use crate::projections::Projection;

/// Adapter that applies committed events to a projection after a successful append.
///
/// Ordering invariant: **the projection sees an event only after the append
/// succeeded**, and it has seen it by the time `append` returns, which gives
/// read-after-write consistency for queries served from the projection.
pub struct ProjectingEventStore<S, P> {
    store: S,
    projection: P,
}

impl<S, P> ProjectingEventStore<S, P> {
    pub fn new(store: S, projection: P) -> Self {
        Self { store, projection }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, P) {
        (self.store, self.projection)
    }
}

impl<S, P> EventStore for ProjectingEventStore<S, P>
where
    S: EventStore,
    P: Projection,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let committed = self.store.append(events, expected_version)?;

        // The commit stands even if the read model rejects it; a rebuild repairs the view.
        for e in &committed {
            if let Err(err) = self.projection.apply_envelope(&e.to_envelope()) {
                warn!(
                    aggregate_id = %e.aggregate_id,
                    sequence_number = e.sequence_number,
                    error = ?err,
                    "projection rejected committed event"
                );
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load_stream(aggregate_id)
    }

    fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, EventStoreError> {
        self.store.stream_ids(aggregate_type)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load_all()
    }
}
