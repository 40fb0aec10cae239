//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 0. Take the aggregate's write guard (try_lock; a held guard is a Conflict)
//!   ↓
//! 1. Load the stream and validate it
//!   ↓
//! 2. Rehydrate the aggregate and check the caller's expected version
//!   ↓
//! 3. Handle the command (pure decision, produces events)
//!   ↓
//! 4. Append with ExpectedVersion::Exact(current)
//!   ↓
//! 5. Publish committed envelopes to the bus
//! ```
//!
//! Writes to one aggregate are serialised by its guard; writes to different
//! aggregates never contend. Nothing here blocks: a busy guard or a stale
//! version fails fast so the caller can re-read and retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use autoshop_core::{Aggregate, AggregateId, ExpectedVersion};
use autoshop_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// Another writer holds the aggregate, or the caller's version is stale.
    #[error("concurrent modification: {0}")]
    Concurrency(String),
    /// The aggregate refused the command.
    #[error("{0}")]
    Domain(E),
    /// Historical payloads could not be read back into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
}

impl<E> From<EventStoreError> for DispatchError<E> {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Outcome of a successful dispatch: the post-commit aggregate and what was committed.
///
/// `committed` is empty when the command was a no-op.
#[derive(Debug)]
pub struct Dispatched<A> {
    pub aggregate: A,
    pub committed: Vec<StoredEvent>,
}

/// One write guard per aggregate id. An entry lives only while some
/// dispatch holds a lease on it.
#[derive(Debug, Default)]
struct WriteGuards {
    guards: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
}

impl WriteGuards {
    fn for_aggregate(&self, aggregate_id: AggregateId) -> Lease<'_> {
        let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        Lease {
            owner: self,
            aggregate_id,
            lock: Arc::clone(guards.entry(aggregate_id).or_default()),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.guards.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A dispatch's handle on one aggregate's guard. The last lease to go
/// removes the map entry.
struct Lease<'a> {
    owner: &'a WriteGuards,
    aggregate_id: AggregateId,
    lock: Arc<Mutex<()>>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let mut guards = self.owner.guards.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only taken under the map lock, so two owners means the map and us.
        let ours = guards
            .get(&self.aggregate_id)
            .is_some_and(|g| Arc::ptr_eq(g, &self.lock));
        if ours && Arc::strong_count(&self.lock) == 2 {
            guards.remove(&self.aggregate_id);
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the event store `S` and the bus `B` committed envelopes are
/// published to, so tests run against in-memory implementations.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    guards: WriteGuards,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            guards: WriteGuards::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// `expected` is what the caller believes the aggregate version to be;
    /// `ExpectedVersion::Any` re-decides against whatever is current. The
    /// append itself always uses the version that was just loaded, so a write
    /// that slipped in between load and append is still caught.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: ExpectedVersion,
        command: &A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError<A::Error>>
    where
        A: Aggregate,
        A::Event: autoshop_events::Event + Serialize + DeserializeOwned,
    {
        // 0) Serialise writers on this aggregate. `_held` drops before `lease`.
        let lease = self.guards.for_aggregate(aggregate_id);
        let _held = match lease.lock.try_lock() {
            Ok(held) => held,
            Err(TryLockError::WouldBlock) => {
                return Err(DispatchError::Concurrency(format!(
                    "{aggregate_type} {aggregate_id} is being modified by another writer"
                )));
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream::<A::Error>(aggregate_id, &history)?;
        let current = stream_version(&history);

        // 2) Rehydrate and check the caller's view
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        expected
            .check(current)
            .map_err(|e| DispatchError::Concurrency(e.to_string()))?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(command).map_err(DispatchError::Domain)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                committed: vec![],
            });
        }

        // 4) Persist (append-only, optimistic)
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self
            .store
            .append(uncommitted, ExpectedVersion::Exact(current))?;

        for ev in &decided {
            aggregate.apply(ev);
        }

        // 5) Publish while still holding the guard, so observers see this
        //    aggregate's envelopes in commit order.
        for stored in &committed {
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                warn!(
                    %aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = ?err,
                    "committed event could not be published"
                );
            }
        }

        Ok(Dispatched {
            aggregate,
            committed,
        })
    }

    /// Rehydrate an aggregate without taking its write guard.
    ///
    /// Returns `None` for a stream with no events.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Option<A>, DispatchError<A::Error>>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        if history.is_empty() {
            return Ok(None);
        }
        self.rehydrate(aggregate_id, &history, make_aggregate).map(Some)
    }

    /// Rebuild an aggregate from a stream the caller already loaded, with
    /// the same checks `load` applies.
    pub fn rehydrate<A>(
        &self,
        aggregate_id: AggregateId,
        history: &[StoredEvent],
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError<A::Error>>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        validate_loaded_stream::<A::Error>(aggregate_id, history)?;
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, history)?;
        Ok(aggregate)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream<E>(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError<E>> {
    // A backend that returns foreign or out-of-order events would corrupt the
    // rehydrated state; refuse it.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-contiguous sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError<A::Error>>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    use chrono::Utc;

    use autoshop_budget::ItemKind;
    use autoshop_core::AggregateRoot;
    use autoshop_events::InMemoryEventBus;
    use autoshop_orders::{
        AddItem, Customer, Intake, OpenOrder, OrderError, OrderId, ServiceOrder,
        ServiceOrderCommand, StartDiagnosis, Vehicle, AGGREGATE_TYPE,
    };

    use crate::event_store::InMemoryEventStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn setup() -> (CommandDispatcher<InMemoryEventStore, Bus>, Bus) {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        (CommandDispatcher::new(InMemoryEventStore::new(), bus.clone()), bus)
    }

    fn intake() -> Intake {
        Intake {
            customer: Customer {
                name: "Ana Ruiz".to_string(),
                phone: None,
                email: None,
            },
            vehicle: Vehicle {
                brand: "Ford".to_string(),
                model: "Focus".to_string(),
                year: None,
                plate: "KLM-456".to_string(),
            },
            reported_issue: String::new(),
        }
    }

    fn run(
        d: &CommandDispatcher<InMemoryEventStore, Bus>,
        id: OrderId,
        expected: ExpectedVersion,
        cmd: ServiceOrderCommand,
    ) -> Result<Dispatched<ServiceOrder>, DispatchError<OrderError>> {
        d.dispatch(id.0, AGGREGATE_TYPE, expected, &cmd, |agg| {
            ServiceOrder::empty(OrderId::new(agg))
        })
    }

    fn open_in_diagnosis(d: &CommandDispatcher<InMemoryEventStore, Bus>) -> OrderId {
        let id = OrderId::new(AggregateId::new());
        run(
            d,
            id,
            ExpectedVersion::Exact(0),
            ServiceOrderCommand::OpenOrder(OpenOrder {
                order_id: id,
                intake: intake(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        run(
            d,
            id,
            ExpectedVersion::Any,
            ServiceOrderCommand::StartDiagnosis(StartDiagnosis {
                order_id: id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        id
    }

    fn add_item(id: OrderId, price: i64) -> ServiceOrderCommand {
        ServiceOrderCommand::AddItem(AddItem {
            order_id: id,
            description: "Filter".to_string(),
            kind: ItemKind::Part,
            price,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_appends_and_publishes_in_order() {
        let (d, bus) = setup();
        let sub = bus.subscribe();
        let id = open_in_diagnosis(&d);

        let out = run(&d, id, ExpectedVersion::Exact(2), add_item(id, 900)).unwrap();
        assert_eq!(out.aggregate.version(), 3);
        assert_eq!(out.committed.len(), 1);

        let seqs: Vec<u64> = sub.drain().iter().map(|e| e.sequence_number()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn stale_expected_version_is_rejected() {
        let (d, _bus) = setup();
        let id = open_in_diagnosis(&d);
        run(&d, id, ExpectedVersion::Exact(2), add_item(id, 100)).unwrap();

        let err = run(&d, id, ExpectedVersion::Exact(2), add_item(id, 200)).unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
        let order = d.load(id.0, |a| ServiceOrder::empty(OrderId::new(a))).unwrap().unwrap();
        assert_eq!(order.items().len(), 1);
    }

    #[test]
    fn domain_refusal_commits_nothing() {
        let (d, bus) = setup();
        let id = open_in_diagnosis(&d);
        let sub = bus.subscribe();

        let err = run(&d, id, ExpectedVersion::Any, add_item(id, -5)).unwrap_err();
        assert!(matches!(err, DispatchError::Domain(OrderError::InvalidItem(_))));
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn load_of_unknown_stream_is_none() {
        let (d, _bus) = setup();
        let loaded = d
            .load(AggregateId::new(), |a| ServiceOrder::empty(OrderId::new(a)))
            .unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn concurrent_writers_never_lose_an_update() {
        let (d, _bus) = setup();
        let d = Arc::new(d);
        let id = open_in_diagnosis(&d);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let d = Arc::clone(&d);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    run(&d, id, ExpectedVersion::Any, add_item(id, 100 + i)).is_ok()
                })
            })
            .collect();
        let succeeded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        let order = d.load(id.0, |a| ServiceOrder::empty(OrderId::new(a))).unwrap().unwrap();
        assert_eq!(d.guards.tracked(), 0);
        assert!(succeeded >= 1);
        assert_eq!(order.items().len(), succeeded);
        let sum: u64 = order.items().iter().map(|i| i.price.cents()).sum();
        assert_eq!(order.total().cents(), sum);
    }

    #[test]
    fn write_guards_are_forgotten_once_released() {
        let (d, _bus) = setup();
        let ids: Vec<OrderId> = (0..50).map(|_| open_in_diagnosis(&d)).collect();
        assert_eq!(d.guards.tracked(), 0);

        // A refused command releases its guard too.
        run(&d, ids[0], ExpectedVersion::Exact(99), add_item(ids[0], 100)).unwrap_err();
        run(&d, ids[1], ExpectedVersion::Any, add_item(ids[1], -1)).unwrap_err();
        assert_eq!(d.guards.tracked(), 0);
    }

    #[test]
    fn a_held_guard_still_turns_away_a_second_writer() {
        let (d, _bus) = setup();
        let id = open_in_diagnosis(&d);

        let lease = d.guards.for_aggregate(id.0);
        let _held = lease.lock.lock().unwrap();
        let err = run(&d, id, ExpectedVersion::Any, add_item(id, 100)).unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
        assert_eq!(d.guards.tracked(), 1);
    }
}
