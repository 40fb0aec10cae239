//! Read models built from committed events.
//!
//! Projections are:
//! - **Rebuildable**: they can be reconstructed from the event log
//! - **Idempotent**: per-stream cursors make redelivery harmless

use std::sync::Arc;

use serde_json::Value as JsonValue;

use autoshop_events::EventEnvelope;

pub mod order_index;

pub use order_index::{
    MaintenanceDue, OrderIndex, OrderIndexError, OrderSummary, Rebuild, SearchScope, StageCounts,
};

/// Something that folds committed envelopes into a read model.
pub trait Projection: Send + Sync {
    type Error: core::fmt::Debug;

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), Self::Error>;
}

impl<P> Projection for Arc<P>
where
    P: Projection + ?Sized,
{
    type Error = P::Error;

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        (**self).apply_envelope(envelope)
    }
}
