//! Order Store: the only way service orders are created, read and changed.
//!
//! Writes go through the `CommandDispatcher`, so every update is decided by the
//! `ServiceOrder` aggregate against freshly loaded state and committed with an
//! optimistic version check. Per-stage listings come from the `OrderIndex`,
//! which the event store feeds inside each append.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use autoshop_core::{AggregateId, ExpectedVersion};
use autoshop_events::{EventBus, EventEnvelope};
use autoshop_orders::{
    AGGREGATE_TYPE, Intake, OpenOrder, OrderId, OrderStatus, ServiceOrder, ServiceOrderCommand,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::error::{ShopError, ShopResult};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{OrderIndex, OrderIndexError};

pub struct OrderStore<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    index: Arc<OrderIndex>,
}

impl<S, B> OrderStore<S, B> {
    /// `index` must be the projection `store` applies committed events to.
    pub fn new(store: S, bus: B, index: Arc<OrderIndex>) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            index,
        }
    }

    pub fn index(&self) -> &Arc<OrderIndex> {
        &self.index
    }

    pub fn event_store(&self) -> &S {
        self.dispatcher.store()
    }

    pub fn bus(&self) -> &B {
        self.dispatcher.bus()
    }
}

impl<S, B> OrderStore<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open a new order in Reception.
    pub fn create(&self, intake: Intake) -> ShopResult<OrderId> {
        let order_id = OrderId::new(AggregateId::new());
        let cmd = ServiceOrderCommand::OpenOrder(OpenOrder {
            order_id,
            intake,
            occurred_at: Utc::now(),
        });
        self.update(order_id, ExpectedVersion::Exact(0), cmd)?;
        Ok(order_id)
    }

    pub fn get(&self, order_id: OrderId) -> ShopResult<ServiceOrder> {
        self.dispatcher
            .load(order_id.0, |id| ServiceOrder::empty(OrderId::new(id)))
            .map_err(ShopError::from)?
            .ok_or_else(|| ShopError::not_found("service order", order_id))
    }

    /// Apply one command to one order.
    ///
    /// `expected` is the version the caller last saw (`Any` to re-decide
    /// against whatever is current). A concurrent writer or a stale version
    /// fails with `Conflict`; nothing is written in that case.
    pub fn update(
        &self,
        order_id: OrderId,
        expected: ExpectedVersion,
        command: ServiceOrderCommand,
    ) -> ShopResult<ServiceOrder> {
        let outcome = self.dispatcher.dispatch(
            order_id.0,
            AGGREGATE_TYPE,
            expected,
            &command,
            |id| ServiceOrder::empty(OrderId::new(id)),
        );

        match outcome {
            Ok(done) => {
                let order = done.aggregate;
                if done.committed.is_empty() {
                    info!(%order_id, command = command.name(), "command was a no-op");
                }
                for stored in &done.committed {
                    info!(
                        %order_id,
                        event_type = %stored.event_type,
                        sequence_number = stored.sequence_number,
                        status = %order.status(),
                        "service order updated"
                    );
                }
                Ok(order)
            }
            Err(DispatchError::Concurrency(msg)) => {
                warn!(%order_id, command = command.name(), %expected, reason = %msg, "write conflict");
                Err(ShopError::Conflict(msg))
            }
            Err(DispatchError::Domain(err)) => {
                warn!(%order_id, command = command.name(), error = %err, "command rejected");
                Err(err.into())
            }
            Err(other) => {
                warn!(%order_id, command = command.name(), error = %other, "command failed");
                Err(other.into())
            }
        }
    }

    /// Authoritative scan of the log: every order currently in `status`,
    /// oldest first. One pass over the log; stations use the index queues
    /// instead.
    pub fn list_by_status(&self, status: OrderStatus) -> ShopResult<Vec<ServiceOrder>> {
        let mut streams: BTreeMap<AggregateId, Vec<StoredEvent>> = BTreeMap::new();
        for stored in self.dispatcher.store().load_all()? {
            if stored.aggregate_type == AGGREGATE_TYPE {
                streams.entry(stored.aggregate_id).or_default().push(stored);
            }
        }

        let mut orders = Vec::new();
        for (id, mut stream) in streams {
            stream.sort_by_key(|e| e.sequence_number);
            let order = self
                .dispatcher
                .rehydrate(id, &stream, |id| ServiceOrder::empty(OrderId::new(id)))
                .map_err(ShopError::from)?;
            if order.status() == status {
                orders.push(order);
            }
        }
        orders.sort_by_key(|o| (o.created_at(), o.id_typed()));
        Ok(orders)
    }

    /// Committed events of one order, oldest first.
    pub fn history(&self, order_id: OrderId) -> ShopResult<Vec<EventEnvelope<JsonValue>>> {
        let stream = self.dispatcher.store().load_stream(order_id.0)?;
        if stream.is_empty() {
            return Err(ShopError::not_found("service order", order_id));
        }
        Ok(stream.iter().map(StoredEvent::to_envelope).collect())
    }

    /// Replay the whole log into a fresh index. Returns the number of orders indexed.
    ///
    /// Writes keep flowing while this runs: anything committed after the log
    /// snapshot is carried over onto the rebuilt index before it goes live.
    pub fn rebuild_index(&self) -> ShopResult<usize> {
        let rebuild = self.index.begin_rebuild().map_err(rebuild_error)?;
        let log = self.dispatcher.store().load_all()?;
        let events = log.len();
        rebuild
            .finish(log.iter().map(StoredEvent::to_envelope))
            .map_err(rebuild_error)?;
        info!(events, orders = self.index.len(), "order index rebuilt");
        Ok(self.index.len())
    }
}

fn rebuild_error(err: OrderIndexError) -> ShopError {
    match err {
        OrderIndexError::RebuildInProgress => ShopError::Conflict(err.to_string()),
        other => ShopError::Store(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoshop_budget::ItemKind;
    use autoshop_events::InMemoryEventBus;
    use autoshop_orders::{AddItem, Customer, StartDiagnosis, Vehicle};

    use crate::event_store::{InMemoryEventStore, ProjectingEventStore};

    type TestStore = OrderStore<
        ProjectingEventStore<InMemoryEventStore, Arc<OrderIndex>>,
        InMemoryEventBus<EventEnvelope<JsonValue>>,
    >;

    fn store() -> TestStore {
        let index = Arc::new(OrderIndex::new());
        OrderStore::new(
            ProjectingEventStore::new(InMemoryEventStore::new(), Arc::clone(&index)),
            InMemoryEventBus::new(),
            index,
        )
    }

    fn intake(plate: &str) -> Intake {
        Intake {
            customer: Customer {
                name: "Maria Perez".into(),
                phone: Some("555-0101".into()),
                email: None,
            },
            vehicle: Vehicle {
                brand: "Toyota".into(),
                model: "Corolla".into(),
                year: Some(2018),
                plate: plate.into(),
            },
            reported_issue: "Brakes squeal".into(),
        }
    }

    fn add_item(order_id: OrderId, description: &str, price: i64) -> ServiceOrderCommand {
        ServiceOrderCommand::AddItem(AddItem {
            order_id,
            description: description.into(),
            kind: ItemKind::Part,
            price,
            occurred_at: Utc::now(),
        })
    }

    fn submit(order_id: OrderId) -> ServiceOrderCommand {
        ServiceOrderCommand::StartDiagnosis(StartDiagnosis {
            order_id,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn create_then_get_returns_reception_order() {
        let s = store();
        let id = s.create(intake("ABC-123")).unwrap();
        let order = s.get(id).unwrap();
        assert_eq!(order.status(), OrderStatus::Reception);
        assert_eq!(order.vehicle().plate, "ABC-123");
        assert_eq!(s.index().get(id).unwrap().status, OrderStatus::Reception);
    }

    #[test]
    fn create_with_blank_plate_is_an_invalid_transition() {
        let s = store();
        let err = s.create(intake("   ")).unwrap_err();
        assert!(matches!(
            err,
            ShopError::InvalidTransition {
                current: None,
                requested: OrderStatus::Reception,
                ..
            }
        ));
        assert!(s.index().is_empty());
    }

    #[test]
    fn get_unknown_order_is_not_found() {
        let s = store();
        let err = s.get(OrderId::new(AggregateId::new())).unwrap_err();
        assert!(matches!(err, ShopError::NotFound { .. }));
    }

    #[test]
    fn sequential_updates_with_fresh_reads_both_land() {
        let s = store();
        let id = s.create(intake("ABC-123")).unwrap();
        s.update(id, ExpectedVersion::Any, submit(id)).unwrap();

        let v = s.get(id).unwrap();
        s.update(id, ExpectedVersion::Exact(autoshop_core::AggregateRoot::version(&v)), add_item(id, "Pads", 15_000))
            .unwrap();
        let v = s.get(id).unwrap();
        let after = s
            .update(id, ExpectedVersion::Exact(autoshop_core::AggregateRoot::version(&v)), add_item(id, "Rotor", 5_000))
            .unwrap();

        assert_eq!(after.items().len(), 2);
        assert_eq!(after.total().cents(), 20_000);
    }

    #[test]
    fn stale_write_is_a_conflict_and_changes_nothing() {
        let s = store();
        let id = s.create(intake("ABC-123")).unwrap();
        s.update(id, ExpectedVersion::Any, submit(id)).unwrap();

        let snapshot = autoshop_core::AggregateRoot::version(&s.get(id).unwrap());
        s.update(id, ExpectedVersion::Exact(snapshot), add_item(id, "Pads", 15_000))
            .unwrap();
        let err = s
            .update(id, ExpectedVersion::Exact(snapshot), add_item(id, "Rotor", 5_000))
            .unwrap_err();

        assert!(matches!(err, ShopError::Conflict(_)));
        let order = s.get(id).unwrap();
        assert_eq!(order.items().len(), 1);
        assert_eq!(s.index().get(id).unwrap().item_count, 1);
    }

    #[test]
    fn list_by_status_agrees_with_the_index() {
        let s = store();
        let a = s.create(intake("AAA-1")).unwrap();
        let b = s.create(intake("BBB-2")).unwrap();
        let c = s.create(intake("CCC-3")).unwrap();
        s.update(b, ExpectedVersion::Any, submit(b)).unwrap();

        let reception: Vec<_> = s
            .list_by_status(OrderStatus::Reception)
            .unwrap()
            .iter()
            .map(ServiceOrder::id_typed)
            .collect();
        assert_eq!(reception, vec![a, c]);

        let queued: Vec<_> = s
            .index()
            .queue(OrderStatus::Reception)
            .into_iter()
            .map(|r| r.order_id)
            .collect();
        assert_eq!(queued, reception);
    }

    /// Counts per-stream reads so listings can be checked for a single pass.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryEventStore,
        stream_reads: std::sync::atomic::AtomicUsize,
    }

    impl EventStore for CountingStore {
        fn append(
            &self,
            events: Vec<crate::event_store::UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, crate::event_store::EventStoreError> {
            self.inner.append(events, expected_version)
        }

        fn load_stream(
            &self,
            aggregate_id: AggregateId,
        ) -> Result<Vec<StoredEvent>, crate::event_store::EventStoreError> {
            self.stream_reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.load_stream(aggregate_id)
        }

        fn stream_ids(
            &self,
            aggregate_type: &str,
        ) -> Result<Vec<AggregateId>, crate::event_store::EventStoreError> {
            self.inner.stream_ids(aggregate_type)
        }

        fn load_all(&self) -> Result<Vec<StoredEvent>, crate::event_store::EventStoreError> {
            self.inner.load_all()
        }
    }

    #[test]
    fn list_by_status_reads_the_log_once() {
        let index = Arc::new(OrderIndex::new());
        let s = OrderStore::new(
            ProjectingEventStore::new(CountingStore::default(), Arc::clone(&index)),
            InMemoryEventBus::<EventEnvelope<JsonValue>>::new(),
            index,
        );
        let ids: Vec<OrderId> = (0..4)
            .map(|n| s.create(intake(&format!("LOG-{n}"))).unwrap())
            .collect();
        s.update(ids[2], ExpectedVersion::Any, submit(ids[2])).unwrap();

        let reads = |s: &OrderStore<ProjectingEventStore<CountingStore, Arc<OrderIndex>>, _>| {
            s.event_store().store().stream_reads.load(std::sync::atomic::Ordering::SeqCst)
        };
        let before = reads(&s);
        let diagnosis = s.list_by_status(OrderStatus::Diagnosis).unwrap();
        let reception = s.list_by_status(OrderStatus::Reception).unwrap();

        assert_eq!(reads(&s), before);
        assert_eq!(diagnosis.iter().map(ServiceOrder::id_typed).collect::<Vec<_>>(), vec![ids[2]]);
        assert_eq!(reception.len(), 3);
    }

    #[test]
    fn rebuild_index_restores_rows() {
        let s = store();
        let a = s.create(intake("AAA-1")).unwrap();
        s.update(a, ExpectedVersion::Any, submit(a)).unwrap();
        let before = s.index().get(a).unwrap();

        assert_eq!(s.rebuild_index().unwrap(), 1);
        assert_eq!(s.index().get(a).unwrap(), before);
    }

    #[test]
    fn history_lists_committed_events() {
        let s = store();
        let a = s.create(intake("AAA-1")).unwrap();
        s.update(a, ExpectedVersion::Any, submit(a)).unwrap();

        let types: Vec<String> = s
            .history(a)
            .unwrap()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(
            types,
            vec!["service_order.opened", "service_order.diagnosis_started"]
        );
    }
}
