//! Station adapters.
//!
//! A `Shop` wires the order store, index, mechanic registry and notifier
//! together. Each station gets a thin adapter exposing only its own
//! operations. Mutating calls are decided against fresh state; a `Conflict`
//! is retried up to `conflict_retries` times unless the caller pinned an
//! expected version with `expecting`, in which case it is returned as is.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use autoshop_budget::{Invoice, ItemKind};
use autoshop_core::ExpectedVersion;
use autoshop_events::{EventEnvelope, Subscription};
use autoshop_mechanics::{
    InMemoryMechanicRegistry, Mechanic, MechanicId, MechanicRegistry, seed_defaults,
};
use autoshop_orders::{
    AddItem, AmendIntake, ApproveBudget, AssignMechanic, Discard, FinishRepair, FlagMaintenance,
    GenerateBudget, Intake, OrderId, OrderStatus, PaymentMethod, Receipt, RecordDiagnosis,
    RecordPayment, ServiceOrder, ServiceOrderCommand, StartDiagnosis,
};

use crate::config::ShopConfig;
use crate::error::{ShopError, ShopResult};
use crate::event_store::{DeadlineEventStore, InMemoryEventStore, ProjectingEventStore};
use crate::notifications::{Notifier, RefreshSignal};
use crate::order_store::OrderStore;
use crate::projections::{MaintenanceDue, OrderIndex, OrderSummary, SearchScope, StageCounts};
use crate::workers::{SubscriberWorker, WorkerHandle};

/// Event log as the shop runs it: bounded calls around a store that feeds the index.
pub type ShopEventStore =
    DeadlineEventStore<ProjectingEventStore<InMemoryEventStore, Arc<OrderIndex>>>;

pub type ShopOrderStore = OrderStore<ShopEventStore, Arc<Notifier>>;

/// Shared handle every station adapter works through.
pub struct Shop {
    orders: ShopOrderStore,
    registry: Arc<dyn MechanicRegistry>,
    notifier: Arc<Notifier>,
    config: ShopConfig,
}

impl Shop {
    /// In-process shop with an in-memory mechanic directory.
    pub fn in_memory(config: ShopConfig) -> ShopResult<Arc<Self>> {
        Self::with_registry(config, Arc::new(InMemoryMechanicRegistry::new()))
    }

    pub fn with_registry(
        config: ShopConfig,
        registry: Arc<dyn MechanicRegistry>,
    ) -> ShopResult<Arc<Self>> {
        let index = Arc::new(OrderIndex::new());
        let notifier = Arc::new(Notifier::new());
        let store = DeadlineEventStore::new(
            ProjectingEventStore::new(InMemoryEventStore::new(), Arc::clone(&index)),
            config.storage_timeout,
        );

        if config.seed_mechanics {
            let added = seed_defaults(registry.as_ref())?;
            if added > 0 {
                info!(added, "seeded default mechanics");
            }
        }

        info!(
            tax_rate = %config.tax_rate,
            conflict_retries = config.conflict_retries,
            storage_timeout_ms = config.storage_timeout.as_millis() as u64,
            "shop ready"
        );

        Ok(Arc::new(Self {
            orders: OrderStore::new(store, Arc::clone(&notifier), index),
            registry,
            notifier,
            config,
        }))
    }

    pub fn config(&self) -> &ShopConfig {
        &self.config
    }

    pub fn orders(&self) -> &ShopOrderStore {
        &self.orders
    }

    pub fn index(&self) -> &OrderIndex {
        self.orders.index()
    }

    pub fn registry(&self) -> &dyn MechanicRegistry {
        self.registry.as_ref()
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Refresh signals for every change committed from now on.
    pub fn watch(&self) -> Subscription<RefreshSignal> {
        self.notifier.watch()
    }

    /// Run `handler` on a background thread for every refresh signal
    /// committed from now on. The worker stops when the handle is dropped.
    pub fn on_refresh<H, E>(&self, name: &'static str, handler: H) -> io::Result<WorkerHandle>
    where
        H: FnMut(RefreshSignal) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        SubscriberWorker::spawn(name, self.watch(), handler)
    }

    pub fn rebuild_index(&self) -> ShopResult<usize> {
        self.orders.rebuild_index()
    }

    pub fn reception(self: &Arc<Self>) -> ReceptionDesk {
        ReceptionDesk(Station::new(self))
    }

    pub fn diagnosis(self: &Arc<Self>) -> DiagnosisBay {
        DiagnosisBay(Station::new(self))
    }

    pub fn workshop(self: &Arc<Self>) -> Workshop {
        Workshop(Station::new(self))
    }

    pub fn cashier(self: &Arc<Self>) -> Cashier {
        Cashier(Station::new(self))
    }

    pub fn dashboard(self: &Arc<Self>) -> Dashboard {
        Dashboard(Station::new(self))
    }

    fn require_mechanic(&self, mechanic_id: MechanicId) -> ShopResult<Mechanic> {
        self.registry
            .get(mechanic_id)
            .ok_or_else(|| ShopError::not_found("mechanic", mechanic_id))
    }
}

/// What every adapter shares: the shop and the version the caller expects.
#[derive(Clone)]
struct Station {
    shop: Arc<Shop>,
    expected: ExpectedVersion,
}

impl Station {
    fn new(shop: &Arc<Shop>) -> Self {
        Self {
            shop: Arc::clone(shop),
            expected: ExpectedVersion::Any,
        }
    }

    /// Run one command, rebuilding it for each attempt so it is decided
    /// against fresh state.
    fn execute(
        &self,
        order_id: OrderId,
        command: impl Fn(DateTime<Utc>) -> ServiceOrderCommand,
    ) -> ShopResult<ServiceOrder> {
        let mut attempt = 0u32;
        loop {
            match self.shop.orders.update(order_id, self.expected, command(Utc::now())) {
                Err(ShopError::Conflict(reason))
                    if self.expected == ExpectedVersion::Any
                        && attempt < self.shop.config.conflict_retries =>
                {
                    attempt += 1;
                    debug!(%order_id, attempt, %reason, "retrying after conflict");
                    thread::sleep(Duration::from_millis(10 * u64::from(attempt)));
                }
                outcome => return outcome,
            }
        }
    }

    fn queue(&self, status: OrderStatus) -> Vec<OrderSummary> {
        self.shop.index().queue(status)
    }
}

macro_rules! pinned_version {
    ($station:ident) => {
        impl $station {
            /// Refuse the next writes with `Conflict` unless the order is still at `version`.
            pub fn expecting(mut self, version: u64) -> Self {
                self.0.expected = ExpectedVersion::Exact(version);
                self
            }
        }
    };
}

/// Intake desk: opens orders and hands them to diagnosis.
#[derive(Clone)]
pub struct ReceptionDesk(Station);

pinned_version!(ReceptionDesk);

impl ReceptionDesk {
    /// Open an order and submit it to diagnosis straight away. The order is
    /// brand new, so a pinned version does not apply to the submit step.
    pub fn create(&self, intake: Intake) -> ShopResult<OrderId> {
        let order_id = self.hold(intake)?;
        let unpinned = Self(Station {
            expected: ExpectedVersion::Any,
            ..self.0.clone()
        });
        if let Err(err) = unpinned.submit(order_id) {
            warn!(%order_id, error = %err, "order opened but not submitted; it stays in reception");
            return Err(err);
        }
        Ok(order_id)
    }

    /// Open an order and keep it at reception.
    pub fn hold(&self, intake: Intake) -> ShopResult<OrderId> {
        self.0.shop.orders.create(intake)
    }

    pub fn amend(&self, order_id: OrderId, intake: Intake) -> ShopResult<ServiceOrder> {
        self.0.execute(order_id, |at| {
            ServiceOrderCommand::AmendIntake(AmendIntake {
                order_id,
                intake: intake.clone(),
                occurred_at: at,
            })
        })
    }

    pub fn submit(&self, order_id: OrderId) -> ShopResult<ServiceOrder> {
        self.0.execute(order_id, |at| {
            ServiceOrderCommand::StartDiagnosis(StartDiagnosis {
                order_id,
                occurred_at: at,
            })
        })
    }

    pub fn queue(&self) -> Vec<OrderSummary> {
        self.0.queue(OrderStatus::Reception)
    }
}

/// Diagnosis bay: mechanic, items, notes and the budget.
#[derive(Clone)]
pub struct DiagnosisBay(Station);

pinned_version!(DiagnosisBay);

impl DiagnosisBay {
    pub fn assign_mechanic(
        &self,
        order_id: OrderId,
        mechanic_id: MechanicId,
    ) -> ShopResult<ServiceOrder> {
        self.0.shop.require_mechanic(mechanic_id)?;
        self.0.execute(order_id, |at| {
            ServiceOrderCommand::AssignMechanic(AssignMechanic {
                order_id,
                mechanic_id,
                occurred_at: at,
            })
        })
    }

    /// `price` is in cents; negative values are refused as an invalid item.
    pub fn add_item(
        &self,
        order_id: OrderId,
        description: &str,
        kind: ItemKind,
        price: i64,
    ) -> ShopResult<ServiceOrder> {
        self.0.execute(order_id, |at| {
            ServiceOrderCommand::AddItem(AddItem {
                order_id,
                description: description.to_string(),
                kind,
                price,
                occurred_at: at,
            })
        })
    }

    pub fn set_maintenance_flag(&self, order_id: OrderId) -> ShopResult<ServiceOrder> {
        self.0.execute(order_id, |at| {
            ServiceOrderCommand::FlagMaintenance(FlagMaintenance {
                order_id,
                occurred_at: at,
            })
        })
    }

    pub fn set_diagnosis_notes(&self, order_id: OrderId, notes: &str) -> ShopResult<ServiceOrder> {
        self.0.execute(order_id, |at| {
            ServiceOrderCommand::RecordDiagnosis(RecordDiagnosis {
                order_id,
                notes: notes.to_string(),
                occurred_at: at,
            })
        })
    }

    /// Freeze the budget at the shop's current tax rate and send it for approval.
    pub fn generate_budget(&self, order_id: OrderId) -> ShopResult<ServiceOrder> {
        let order = self.0.shop.orders.get(order_id)?;
        if let (true, Some(mechanic_id)) = (order.is_in_diagnosis(), order.mechanic_id()) {
            self.0.shop.require_mechanic(mechanic_id)?;
        }

        let tax_rate = self.0.shop.config.tax_rate;
        self.0.execute(order_id, |at| {
            ServiceOrderCommand::GenerateBudget(GenerateBudget {
                order_id,
                tax_rate,
                occurred_at: at,
            })
        })
    }

    pub fn queue(&self) -> Vec<OrderSummary> {
        self.0.queue(OrderStatus::Diagnosis)
    }
}

/// Workshop: approval, repair and cancellation.
#[derive(Clone)]
pub struct Workshop(Station);

pinned_version!(Workshop);

impl Workshop {
    pub fn approve(&self, order_id: OrderId) -> ShopResult<ServiceOrder> {
        self.0.execute(order_id, |at| {
            ServiceOrderCommand::ApproveBudget(ApproveBudget {
                order_id,
                occurred_at: at,
            })
        })
    }

    pub fn discard(&self, order_id: OrderId, reason: Option<&str>) -> ShopResult<ServiceOrder> {
        self.0.execute(order_id, |at| {
            ServiceOrderCommand::Discard(Discard {
                order_id,
                reason: reason.map(str::to_string),
                occurred_at: at,
            })
        })
    }

    pub fn finish_repair(&self, order_id: OrderId) -> ShopResult<ServiceOrder> {
        self.0.execute(order_id, |at| {
            ServiceOrderCommand::FinishRepair(FinishRepair {
                order_id,
                occurred_at: at,
            })
        })
    }

    /// The approval or repair queue, oldest first.
    pub fn list_by_status(&self, status: OrderStatus) -> ShopResult<Vec<OrderSummary>> {
        match status {
            OrderStatus::PendingApproval | OrderStatus::InRepair => Ok(self.0.queue(status)),
            other => Err(ShopError::invalid_input(
                "status",
                format!("the workshop lists pending approval or in repair orders, not {other}"),
            )),
        }
    }
}

/// Cashier: invoices and payment.
#[derive(Clone)]
pub struct Cashier(Station);

pinned_version!(Cashier);

impl Cashier {
    /// Orders waiting to be paid, oldest first.
    pub fn queue(&self) -> Vec<OrderSummary> {
        self.0.queue(OrderStatus::ReadyForPayment)
    }

    pub fn compute_invoice(&self, order_id: OrderId) -> ShopResult<Invoice> {
        let order = self.0.shop.orders.get(order_id)?;
        Ok(order.invoice(self.0.shop.registry())?)
    }

    /// Settle an order. A blank method is refused by the lifecycle; an
    /// unrecognised one is invalid input, but only for an order that could
    /// be paid at all.
    pub fn pay(
        &self,
        order_id: OrderId,
        method: &str,
        warranty: Option<&str>,
    ) -> ShopResult<ServiceOrder> {
        let method = match method.trim() {
            "" => None,
            text => match text.parse::<PaymentMethod>() {
                Ok(method) => Some(method),
                Err(reason) => {
                    self.0.shop.orders.get(order_id)?.check_payable()?;
                    return Err(ShopError::invalid_input("payment_method", reason));
                }
            },
        };
        self.pay_with(order_id, method, warranty)
    }

    pub fn pay_with(
        &self,
        order_id: OrderId,
        method: Option<PaymentMethod>,
        warranty: Option<&str>,
    ) -> ShopResult<ServiceOrder> {
        self.0.execute(order_id, |at| {
            ServiceOrderCommand::RecordPayment(RecordPayment {
                order_id,
                method,
                warranty: warranty.map(str::to_string),
                occurred_at: at,
            })
        })
    }

    pub fn receipt(&self, order_id: OrderId) -> ShopResult<Receipt> {
        let order = self.0.shop.orders.get(order_id)?;
        Ok(order.receipt(self.0.shop.registry())?)
    }
}

/// Everything the dashboard shows about one order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub order: ServiceOrder,
    pub mechanic: Option<Mechanic>,
    /// Present once a budget has been generated.
    pub invoice: Option<Invoice>,
}

/// Dashboard and history: read-only views plus the mechanic roster.
#[derive(Clone)]
pub struct Dashboard(Station);

impl Dashboard {
    pub fn search(&self, query: &str, scope: SearchScope) -> Vec<OrderSummary> {
        self.0.shop.index().search(query, scope)
    }

    pub fn get_detail(&self, order_id: OrderId) -> ShopResult<OrderDetail> {
        let order = self.0.shop.orders.get(order_id)?;
        let registry = self.0.shop.registry();
        let mechanic = order.mechanic_id().and_then(|id| registry.get(id));
        let invoice = order.invoice(registry).ok();
        Ok(OrderDetail {
            order,
            mechanic,
            invoice,
        })
    }

    pub fn history(&self, order_id: OrderId) -> ShopResult<Vec<EventEnvelope<JsonValue>>> {
        self.0.shop.orders.history(order_id)
    }

    pub fn stage_counts(&self) -> StageCounts {
        self.0.shop.index().stage_counts()
    }

    pub fn maintenance_due(&self, now: DateTime<Utc>) -> Vec<MaintenanceDue> {
        self.0
            .shop
            .index()
            .maintenance_due(now, self.0.shop.config.maintenance_interval())
    }

    pub fn mechanics(&self) -> Vec<Mechanic> {
        self.0.shop.registry().list()
    }

    pub fn add_mechanic(&self, name: &str, code: &str) -> ShopResult<Mechanic> {
        let id = self.0.shop.registry().add(name, code)?;
        self.0.shop.require_mechanic(id)
    }
}
