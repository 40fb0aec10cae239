//! Refresh notifications for station views.
//!
//! The notifier sits where the dispatcher publishes committed envelopes. It
//! forwards every envelope unchanged and, for service order events, emits a
//! `RefreshSignal` naming the views whose contents just changed. Observers
//! never receive order state through here; they re-query the store or index.

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

use autoshop_events::{EventBus, EventEnvelope, InMemoryBusError, InMemoryEventBus, Subscription};
use autoshop_orders::{AGGREGATE_TYPE, OrderId, OrderStatus, ServiceOrderEvent};

/// A screen that lists orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StationView {
    Reception,
    Diagnosis,
    /// Approval and repair queues.
    Workshop,
    Cashier,
    Dashboard,
    History,
}

impl StationView {
    /// The stage view that lists orders in `status`, if any.
    pub fn for_status(status: OrderStatus) -> Option<StationView> {
        match status {
            OrderStatus::Reception => Some(StationView::Reception),
            OrderStatus::Diagnosis => Some(StationView::Diagnosis),
            OrderStatus::PendingApproval | OrderStatus::InRepair => Some(StationView::Workshop),
            OrderStatus::ReadyForPayment => Some(StationView::Cashier),
            OrderStatus::Closed | OrderStatus::Cancelled => None,
        }
    }
}

/// "Something about this order changed; re-render these views."
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshSignal {
    pub order_id: OrderId,
    pub event_type: String,
    pub sequence_number: u64,
    pub previous_status: Option<OrderStatus>,
    pub status: OrderStatus,
    pub views: Vec<StationView>,
}

impl RefreshSignal {
    /// Translate a committed envelope. Envelopes of other aggregate types yield `None`.
    pub fn from_envelope(envelope: &EventEnvelope<JsonValue>) -> Result<Option<Self>, NotifierError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(None);
        }
        let ev: ServiceOrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| NotifierError::Deserialize(e.to_string()))?;
        let (previous_status, status) = ev.transition();

        let mut views: Vec<StationView> = previous_status
            .and_then(StationView::for_status)
            .into_iter()
            .chain(StationView::for_status(status))
            .chain([StationView::Dashboard, StationView::History])
            .collect();
        views.sort();
        views.dedup();

        Ok(Some(Self {
            order_id: ev.order_id(),
            event_type: envelope.event_type().to_string(),
            sequence_number: envelope.sequence_number(),
            previous_status,
            status,
            views,
        }))
    }

    pub fn touches(&self, view: StationView) -> bool {
        self.views.contains(&view)
    }
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("failed to decode committed event: {0}")]
    Deserialize(String),
    #[error("notification bus unavailable")]
    BusPoisoned,
}

impl From<InMemoryBusError> for NotifierError {
    fn from(_: InMemoryBusError) -> Self {
        NotifierError::BusPoisoned
    }
}

/// The notification boundary.
///
/// Implements the bus contract for committed envelopes so the dispatcher can
/// publish into it directly; `watch()` hands out refresh signal subscriptions.
#[derive(Debug, Default)]
pub struct Notifier {
    envelopes: InMemoryEventBus<EventEnvelope<JsonValue>>,
    signals: InMemoryEventBus<RefreshSignal>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to refresh signals published from now on.
    pub fn watch(&self) -> Subscription<RefreshSignal> {
        self.signals.subscribe()
    }

    pub fn watcher_count(&self) -> usize {
        self.signals.subscriber_count()
    }
}

impl EventBus<EventEnvelope<JsonValue>> for Notifier {
    type Error = NotifierError;

    fn publish(&self, envelope: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        let signal = RefreshSignal::from_envelope(&envelope);
        self.envelopes.publish(envelope)?;

        match signal {
            Ok(Some(signal)) => self.signals.publish(signal)?,
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "committed envelope could not be turned into a refresh signal");
                return Err(err);
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.envelopes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoshop_core::AggregateId;
    use autoshop_events::Event;
    use autoshop_orders::{BudgetApproved, OrderDiscarded, PaymentRecorded, PaymentMethod};
    use chrono::Utc;
    use uuid::Uuid;

    fn envelope(ev: &ServiceOrderEvent, seq: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            ev.order_id().0,
            AGGREGATE_TYPE,
            seq,
            ev.event_type(),
            ev.occurred_at(),
            serde_json::to_value(ev).unwrap(),
        )
    }

    fn order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    #[test]
    fn approval_refreshes_workshop_dashboard_and_history() {
        let ev = ServiceOrderEvent::BudgetApproved(BudgetApproved {
            order_id: order_id(),
            occurred_at: Utc::now(),
        });
        let signal = RefreshSignal::from_envelope(&envelope(&ev, 9)).unwrap().unwrap();

        assert_eq!(signal.previous_status, Some(OrderStatus::PendingApproval));
        assert_eq!(signal.status, OrderStatus::InRepair);
        assert_eq!(
            signal.views,
            vec![StationView::Workshop, StationView::Dashboard, StationView::History]
        );
        assert_eq!(signal.sequence_number, 9);
    }

    #[test]
    fn payment_clears_the_cashier_view() {
        let ev = ServiceOrderEvent::PaymentRecorded(PaymentRecorded {
            order_id: order_id(),
            method: PaymentMethod::Cash,
            warranty: None,
            occurred_at: Utc::now(),
        });
        let signal = RefreshSignal::from_envelope(&envelope(&ev, 12)).unwrap().unwrap();
        assert!(signal.touches(StationView::Cashier));
        assert!(signal.touches(StationView::History));
        assert!(!signal.touches(StationView::Workshop));
        assert_eq!(signal.status, OrderStatus::Closed);
    }

    #[test]
    fn discard_from_diagnosis_refreshes_diagnosis() {
        let ev = ServiceOrderEvent::OrderDiscarded(OrderDiscarded {
            order_id: order_id(),
            from: OrderStatus::Diagnosis,
            reason: Some("customer declined".into()),
            occurred_at: Utc::now(),
        });
        let signal = RefreshSignal::from_envelope(&envelope(&ev, 4)).unwrap().unwrap();
        assert_eq!(
            signal.views,
            vec![StationView::Diagnosis, StationView::Dashboard, StationView::History]
        );
    }

    #[test]
    fn notifier_forwards_envelopes_and_emits_signals() {
        let notifier = Notifier::new();
        let raw = notifier.subscribe();
        let signals = notifier.watch();

        let ev = ServiceOrderEvent::BudgetApproved(BudgetApproved {
            order_id: order_id(),
            occurred_at: Utc::now(),
        });
        notifier.publish(envelope(&ev, 3)).unwrap();

        assert_eq!(raw.drain().len(), 1);
        let got = signals.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].order_id, ev.order_id());
    }

    #[test]
    fn foreign_envelopes_pass_through_without_signal() {
        let notifier = Notifier::new();
        let raw = notifier.subscribe();
        let signals = notifier.watch();

        let env = EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "mechanic",
            1,
            "mechanic.added",
            Utc::now(),
            serde_json::json!({}),
        );
        notifier.publish(env).unwrap();

        assert_eq!(raw.drain().len(), 1);
        assert!(signals.drain().is_empty());
    }

    #[test]
    fn undecodable_payload_is_reported_but_still_forwarded() {
        let notifier = Notifier::new();
        let raw = notifier.subscribe();

        let env = EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            AGGREGATE_TYPE,
            1,
            "service_order.opened",
            Utc::now(),
            serde_json::json!({"nope": true}),
        );
        let err = notifier.publish(env).unwrap_err();
        assert!(matches!(err, NotifierError::Deserialize(_)));
        assert_eq!(raw.drain().len(), 1);
    }
}
