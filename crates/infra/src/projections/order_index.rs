use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use autoshop_budget::Money;
use autoshop_events::EventEnvelope;
use autoshop_mechanics::MechanicId;
use autoshop_orders::{
    AGGREGATE_TYPE, Intake, OrderId, OrderStatus, PaymentMethod, ServiceOrderEvent,
};

use super::Projection;

/// One row of the index: what station lists and search results display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub customer_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub brand: String,
    pub model: String,
    pub year: Option<u16>,
    pub plate: String,
    pub reported_issue: String,
    pub status: OrderStatus,
    pub is_maintenance: bool,
    pub mechanic_id: Option<MechanicId>,
    pub diagnosis_notes: Option<String>,
    pub item_count: usize,
    pub total: Money,
    pub payment_method: Option<PaymentMethod>,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    /// Last applied sequence number of the order's stream.
    pub version: u64,
    #[serde(skip)]
    search_key: String,
}

impl OrderSummary {
    fn opened(order_id: OrderId, intake: &Intake, at: DateTime<Utc>) -> Self {
        let mut row = Self {
            order_id,
            customer_name: String::new(),
            phone: None,
            email: None,
            brand: String::new(),
            model: String::new(),
            year: None,
            plate: String::new(),
            reported_issue: String::new(),
            status: OrderStatus::Reception,
            is_maintenance: false,
            mechanic_id: None,
            diagnosis_notes: None,
            item_count: 0,
            total: Money::ZERO,
            payment_method: None,
            created_at: at,
            status_changed_at: at,
            version: 0,
            search_key: String::new(),
        };
        row.set_intake(intake);
        row
    }

    fn set_intake(&mut self, intake: &Intake) {
        self.customer_name = intake.customer.name.clone();
        self.phone = intake.customer.phone.clone();
        self.email = intake.customer.email.clone();
        self.brand = intake.vehicle.brand.clone();
        self.model = intake.vehicle.model.clone();
        self.year = intake.vehicle.year;
        self.plate = intake.vehicle.plate.clone();
        self.reported_issue = intake.reported_issue.clone();
        // Newline-separated so a match cannot straddle two fields.
        self.search_key = [&self.customer_name, &self.brand, &self.model, &self.plate]
            .map(|s| s.to_lowercase())
            .join("\n");
    }

    /// Case-insensitive substring match over name, brand, model, plate and
    /// the current status (`in repair` or `in_repair`). `needle` must
    /// already be lowercase.
    fn matches(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.search_key.contains(needle)
            || self.status.as_str().contains(needle)
            || self.status.label().to_lowercase().contains(needle)
    }

    fn queue_key(&self) -> QueueKey {
        (self.created_at, self.order_id)
    }
}

/// Which orders a search looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// Every order, terminal ones included.
    History,
    /// Orders that are not closed or cancelled.
    Active,
    Stage(OrderStatus),
}

impl core::str::FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "history" | "all" => Ok(SearchScope::History),
            "active" => Ok(SearchScope::Active),
            other => other
                .parse::<OrderStatus>()
                .map(SearchScope::Stage)
                .map_err(|_| format!("unknown search scope '{s}'")),
        }
    }
}

/// A plate whose last maintenance visit is older than the service interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceDue {
    pub plate: String,
    pub last_service_at: DateTime<Utc>,
    pub days_since: i64,
    pub last_order: OrderSummary,
}

/// Number of orders per status; every status is present.
pub type StageCounts = BTreeMap<OrderStatus, usize>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderIndexError {
    #[error("failed to deserialize service order event: {0}")]
    Deserialize(String),
    #[error("event does not belong to its stream: {0}")]
    StreamMismatch(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
    #[error("order index lock poisoned")]
    Poisoned,
    #[error("an index rebuild is already running")]
    RebuildInProgress,
}

type QueueKey = (DateTime<Utc>, OrderId);

#[derive(Debug, Default)]
struct IndexState {
    rows: HashMap<OrderId, OrderSummary>,
    /// One ordered bucket per status; an order sits in exactly one of them.
    buckets: HashMap<OrderStatus, BTreeSet<QueueKey>>,
    cursors: HashMap<OrderId, u64>,
    /// Envelopes applied while a rebuild is running, replayed onto the
    /// rebuilt state before it replaces this one.
    pending: Option<Vec<EventEnvelope<JsonValue>>>,
}

impl IndexState {
    fn move_to(&mut self, order_id: OrderId, status: OrderStatus, at: DateTime<Utc>) {
        let Some(row) = self.rows.get_mut(&order_id) else {
            return;
        };
        let key = row.queue_key();
        if let Some(bucket) = self.buckets.get_mut(&row.status) {
            bucket.remove(&key);
        }
        row.status = status;
        row.status_changed_at = at;
        self.buckets.entry(status).or_default().insert(key);
    }
}

/// Incrementally maintained per-stage queues and search index over orders.
///
/// Row and bucket membership change under one write lock, so a reader never
/// sees an order in a queue whose stage differs from the order's status.
#[derive(Debug, Default)]
pub struct OrderIndex {
    state: RwLock<IndexState>,
}

impl OrderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Readers keep serving the last state after a writer panicked. Writes
    /// refuse until a rebuild swaps in a fresh state.
    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The write lock for a full state swap, which also clears any poison.
    fn write_for_swap(&self) -> RwLockWriteGuard<'_, IndexState> {
        let guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.state.clear_poison();
        guard
    }

    pub fn len(&self) -> usize {
        self.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, order_id: OrderId) -> Option<OrderSummary> {
        self.read().rows.get(&order_id).cloned()
    }

    /// Orders currently in `status`, oldest first.
    pub fn queue(&self, status: OrderStatus) -> Vec<OrderSummary> {
        let state = self.read();
        state
            .buckets
            .get(&status)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter_map(|(_, id)| state.rows.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Free-text search within `scope`, newest first. A blank query matches everything.
    pub fn search(&self, query: &str, scope: SearchScope) -> Vec<OrderSummary> {
        let needle = query.trim().to_lowercase();
        let state = self.read();

        let mut hits: Vec<OrderSummary> = match scope {
            SearchScope::Stage(status) => state
                .buckets
                .get(&status)
                .into_iter()
                .flatten()
                .filter_map(|(_, id)| state.rows.get(id))
                .filter(|row| row.matches(&needle))
                .cloned()
                .collect(),
            SearchScope::History | SearchScope::Active => state
                .rows
                .values()
                .filter(|row| scope == SearchScope::History || row.status.is_active())
                .filter(|row| row.matches(&needle))
                .cloned()
                .collect(),
        };
        hits.sort_by(|a, b| b.queue_key().cmp(&a.queue_key()));
        hits
    }

    pub fn stage_counts(&self) -> StageCounts {
        let mut counts: StageCounts = OrderStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, bucket) in &self.read().buckets {
            counts.insert(*status, bucket.len());
        }
        counts
    }

    /// Plates whose most recent maintenance order was opened more than
    /// `interval` before `now`, oldest first. Cancelled orders do not count.
    pub fn maintenance_due(&self, now: DateTime<Utc>, interval: Duration) -> Vec<MaintenanceDue> {
        let state = self.read();

        let mut latest: HashMap<String, &OrderSummary> = HashMap::new();
        for row in state.rows.values() {
            if !row.is_maintenance || row.status == OrderStatus::Cancelled {
                continue;
            }
            let plate = row.plate.to_uppercase();
            match latest.get(&plate) {
                Some(seen) if seen.queue_key() >= row.queue_key() => {}
                _ => {
                    latest.insert(plate, row);
                }
            }
        }

        let mut due: Vec<MaintenanceDue> = latest
            .into_iter()
            .filter(|(_, row)| now - row.created_at > interval)
            .map(|(plate, row)| MaintenanceDue {
                plate,
                last_service_at: row.created_at,
                days_since: (now - row.created_at).num_days(),
                last_order: row.clone(),
            })
            .collect();
        due.sort_by(|a, b| {
            a.last_service_at
                .cmp(&b.last_service_at)
                .then_with(|| a.plate.cmp(&b.plate))
        });
        due
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), OrderIndexError> {
        let Some(ev) = decode(envelope)? else {
            return Ok(());
        };

        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => {
                // A running rebuild still needs the envelope to repair the index.
                if let Some(pending) = poisoned.into_inner().pending.as_mut() {
                    pending.push(envelope.clone());
                }
                return Err(OrderIndexError::Poisoned);
            }
        };
        let applied = state.apply(envelope, &ev)?;
        if applied {
            if let Some(pending) = state.pending.as_mut() {
                pending.push(envelope.clone());
            }
            debug!(
                order_id = %ev.order_id(),
                sequence_number = envelope.sequence_number(),
                event_type = envelope.event_type(),
                "order index updated"
            );
        }
        Ok(())
    }

    /// Start a rebuild. Envelopes applied from now until `Rebuild::finish`
    /// are kept aside and replayed onto the rebuilt state, so the log
    /// snapshot must be taken after this call. Only one rebuild runs at a time.
    pub fn begin_rebuild(&self) -> Result<Rebuild<'_>, OrderIndexError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.pending.is_some() {
            return Err(OrderIndexError::RebuildInProgress);
        }
        state.pending = Some(Vec::new());
        Ok(Rebuild { index: self, finished: false })
    }

    /// Drop everything and replay `envelopes` (any order; sorted per stream here).
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), OrderIndexError> {
        self.begin_rebuild()?.finish(envelopes)
    }
}

/// A running index rebuild; see `OrderIndex::begin_rebuild`. Dropping it
/// without `finish` leaves the live index as it was.
#[must_use = "a rebuild does nothing until it is finished"]
pub struct Rebuild<'a> {
    index: &'a OrderIndex,
    finished: bool,
}

impl Rebuild<'_> {
    /// Replace the live state with one built from `snapshot` plus every
    /// envelope applied since the rebuild began. This also recovers an
    /// index whose lock was poisoned.
    pub fn finish(
        mut self,
        snapshot: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), OrderIndexError> {
        let mut envs: Vec<_> = snapshot.into_iter().collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        let mut fresh = IndexState::default();
        for env in &envs {
            if let Some(ev) = decode(env)? {
                fresh.apply(env, &ev)?;
            }
        }

        let mut state = self.index.write_for_swap();
        self.finished = true;
        let tail = state.pending.take().unwrap_or_default();
        let tail_len = tail.len();
        for env in &tail {
            if let Some(ev) = decode(env)? {
                fresh.apply(env, &ev)?;
            }
        }
        *state = fresh;
        debug!(snapshot = envs.len(), tail = tail_len, "order index swapped after rebuild");
        Ok(())
    }
}

impl Drop for Rebuild<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut state = self.index.state.write().unwrap_or_else(PoisonError::into_inner);
            state.pending = None;
        }
    }
}

/// `None` for envelopes of other aggregate types.
fn decode(envelope: &EventEnvelope<JsonValue>) -> Result<Option<ServiceOrderEvent>, OrderIndexError> {
    if envelope.aggregate_type() != AGGREGATE_TYPE {
        return Ok(None);
    }
    let ev: ServiceOrderEvent = serde_json::from_value(envelope.payload().clone())
        .map_err(|e| OrderIndexError::Deserialize(e.to_string()))?;
    if ev.order_id().0 != envelope.aggregate_id() {
        return Err(OrderIndexError::StreamMismatch(
            "event order_id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok(Some(ev))
}

impl IndexState {
    /// Apply one decoded event. Returns `false` for an envelope already seen.
    fn apply(
        &mut self,
        envelope: &EventEnvelope<JsonValue>,
        ev: &ServiceOrderEvent,
    ) -> Result<bool, OrderIndexError> {
        let order_id = ev.order_id();
        let seq = envelope.sequence_number();
        let last = self.cursors.get(&order_id).copied().unwrap_or(0);
        if seq <= last && seq != 0 {
            return Ok(false);
        }
        if seq != last + 1 {
            return Err(OrderIndexError::NonMonotonicSequence { last, found: seq });
        }

        let (_, status) = ev.transition();
        match ev {
            ServiceOrderEvent::OrderOpened(e) => {
                let row = OrderSummary::opened(order_id, &e.intake, e.occurred_at);
                self.buckets
                    .entry(OrderStatus::Reception)
                    .or_default()
                    .insert(row.queue_key());
                self.rows.insert(order_id, row);
            }
            ServiceOrderEvent::IntakeAmended(e) => {
                if let Some(row) = self.rows.get_mut(&order_id) {
                    row.set_intake(&e.intake);
                }
            }
            ServiceOrderEvent::MechanicAssigned(e) => {
                if let Some(row) = self.rows.get_mut(&order_id) {
                    row.mechanic_id = Some(e.mechanic_id);
                }
            }
            ServiceOrderEvent::ItemAdded(e) => {
                if let Some(row) = self.rows.get_mut(&order_id) {
                    row.item_count += 1;
                    row.total = Money::from_cents(row.total.cents().saturating_add(e.item.price.cents()));
                }
            }
            ServiceOrderEvent::MaintenanceFlagged(_) => {
                if let Some(row) = self.rows.get_mut(&order_id) {
                    row.is_maintenance = true;
                }
            }
            ServiceOrderEvent::DiagnosisRecorded(e) => {
                if let Some(row) = self.rows.get_mut(&order_id) {
                    row.diagnosis_notes = Some(e.notes.clone());
                }
            }
            ServiceOrderEvent::BudgetGenerated(e) => {
                if let Some(row) = self.rows.get_mut(&order_id) {
                    row.total = e.total;
                    row.mechanic_id = Some(e.mechanic_id);
                }
                self.move_to(order_id, status, e.occurred_at);
            }
            ServiceOrderEvent::PaymentRecorded(e) => {
                if let Some(row) = self.rows.get_mut(&order_id) {
                    row.payment_method = Some(e.method);
                }
                self.move_to(order_id, status, e.occurred_at);
            }
            ServiceOrderEvent::DiagnosisStarted(_)
            | ServiceOrderEvent::BudgetApproved(_)
            | ServiceOrderEvent::RepairFinished(_)
            | ServiceOrderEvent::OrderDiscarded(_) => {
                self.move_to(order_id, status, envelope.occurred_at());
            }
        }

        if let Some(row) = self.rows.get_mut(&order_id) {
            row.version = seq;
        }
        self.cursors.insert(order_id, seq);
        Ok(true)
    }
}

impl Projection for OrderIndex {
    type Error = OrderIndexError;

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        OrderIndex::apply_envelope(self, envelope)
    }
}
