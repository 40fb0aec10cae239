use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use autoshop_budget::{Budget, BudgetError, BudgetItem, Invoice, ItemKind, Money, TaxRate, compute_invoice};
use autoshop_core::{Aggregate, AggregateId, AggregateRoot};
use autoshop_events::{Command, Event};
use autoshop_mechanics::{MechanicId, MechanicRegistry};

use crate::error::OrderError;
use crate::intake::{Customer, Intake, Vehicle};
use crate::status::{OrderStatus, PaymentMethod};

/// Stream type recorded on every service order event.
pub const AGGREGATE_TYPE: &str = "service_order";

/// Service order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for OrderId {
    type Err = autoshop_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<AggregateId>().map(Self)
    }
}

/// How and when an order was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub warranty: Option<String>,
}

/// Printed at the cashier once an order is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub invoice: Invoice,
    pub customer: Customer,
    pub vehicle: Vehicle,
    pub payment_method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub warranty: Option<String>,
}

/// Aggregate root: ServiceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceOrder {
    id: OrderId,
    intake: Intake,
    status: OrderStatus,
    is_maintenance: bool,
    mechanic_id: Option<MechanicId>,
    diagnosis_notes: Option<String>,
    budget: Budget,
    /// Snapshot taken when the budget was generated.
    tax_rate: Option<TaxRate>,
    payment: Option<Payment>,
    discard_reason: Option<String>,
    cancelled_from: Option<OrderStatus>,
    created_at: DateTime<Utc>,
    status_changed_at: DateTime<Utc>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl ServiceOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            intake: Intake::default(),
            status: OrderStatus::Reception,
            is_maintenance: false,
            mechanic_id: None,
            diagnosis_notes: None,
            budget: Budget::new(),
            tax_rate: None,
            payment: None,
            discard_reason: None,
            cancelled_from: None,
            created_at: DateTime::<Utc>::default(),
            status_changed_at: DateTime::<Utc>::default(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn intake(&self) -> &Intake {
        &self.intake
    }

    pub fn customer(&self) -> &Customer {
        &self.intake.customer
    }

    pub fn vehicle(&self) -> &Vehicle {
        &self.intake.vehicle
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn is_maintenance(&self) -> bool {
        self.is_maintenance
    }

    pub fn mechanic_id(&self) -> Option<MechanicId> {
        self.mechanic_id
    }

    pub fn diagnosis_notes(&self) -> Option<&str> {
        self.diagnosis_notes.as_deref()
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn items(&self) -> &[BudgetItem] {
        self.budget.items()
    }

    pub fn total(&self) -> Money {
        self.budget.total()
    }

    pub fn tax_rate(&self) -> Option<TaxRate> {
        self.tax_rate
    }

    pub fn payment(&self) -> Option<&Payment> {
        self.payment.as_ref()
    }

    pub fn payment_method(&self) -> Option<PaymentMethod> {
        self.payment.as_ref().map(|p| p.method)
    }

    pub fn discard_reason(&self) -> Option<&str> {
        self.discard_reason.as_deref()
    }

    pub fn cancelled_from(&self) -> Option<OrderStatus> {
        self.cancelled_from
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status_changed_at(&self) -> DateTime<Utc> {
        self.status_changed_at
    }

    /// Items, mechanic, notes and the maintenance flag are editable only here.
    pub fn is_in_diagnosis(&self) -> bool {
        self.status == OrderStatus::Diagnosis
    }

    /// Refuses payment unless the order is waiting at the cashier. Checked
    /// before the payment method.
    pub fn check_payable(&self) -> Result<(), OrderError> {
        if self.status != OrderStatus::ReadyForPayment {
            return Err(self.refuse(OrderStatus::Closed, "order is not ready for payment"));
        }
        Ok(())
    }

    /// The invoice projection. Only exists once the budget has been generated;
    /// the tax rate is the snapshot taken then, so the result does not drift
    /// between approval and payment.
    pub fn invoice<R>(&self, registry: &R) -> Result<Invoice, OrderError>
    where
        R: MechanicRegistry + ?Sized,
    {
        let Some(tax_rate) = self.tax_rate.filter(|_| self.budget.is_frozen()) else {
            return Err(OrderError::invalid_transition(
                Some(self.status),
                OrderStatus::PendingApproval,
                "budget has not been generated",
            ));
        };
        Ok(compute_invoice(
            self.id.0,
            &self.budget,
            tax_rate,
            self.mechanic_id,
            self.is_maintenance,
            registry,
        ))
    }

    pub fn receipt<R>(&self, registry: &R) -> Result<Receipt, OrderError>
    where
        R: MechanicRegistry + ?Sized,
    {
        let Some(payment) = self.payment.as_ref().filter(|_| self.status == OrderStatus::Closed)
        else {
            return Err(OrderError::invalid_transition(
                Some(self.status),
                OrderStatus::Closed,
                "order has not been paid",
            ));
        };
        Ok(Receipt {
            invoice: self.invoice(registry)?,
            customer: self.intake.customer.clone(),
            vehicle: self.intake.vehicle.clone(),
            payment_method: payment.method,
            paid_at: payment.paid_at,
            warranty: payment.warranty.clone(),
        })
    }
}

impl AggregateRoot for ServiceOrder {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenOrder (reception intake).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub intake: Intake,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AmendIntake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendIntake {
    pub order_id: OrderId,
    pub intake: Intake,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartDiagnosis (reception submits the order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartDiagnosis {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignMechanic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignMechanic {
    pub order_id: OrderId,
    pub mechanic_id: MechanicId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub order_id: OrderId,
    pub description: String,
    pub kind: ItemKind,
    /// Price in cents; signed so that negative input can be rejected.
    pub price: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FlagMaintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagMaintenance {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDiagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDiagnosis {
    pub order_id: OrderId,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: GenerateBudget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateBudget {
    pub order_id: OrderId,
    pub tax_rate: TaxRate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveBudget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveBudget {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FinishRepair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishRepair {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub order_id: OrderId,
    pub method: Option<PaymentMethod>,
    pub warranty: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Discard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discard {
    pub order_id: OrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceOrderCommand {
    OpenOrder(OpenOrder),
    AmendIntake(AmendIntake),
    StartDiagnosis(StartDiagnosis),
    AssignMechanic(AssignMechanic),
    AddItem(AddItem),
    FlagMaintenance(FlagMaintenance),
    RecordDiagnosis(RecordDiagnosis),
    GenerateBudget(GenerateBudget),
    ApproveBudget(ApproveBudget),
    FinishRepair(FinishRepair),
    RecordPayment(RecordPayment),
    Discard(Discard),
}

impl ServiceOrderCommand {
    pub fn order_id(&self) -> OrderId {
        match self {
            ServiceOrderCommand::OpenOrder(c) => c.order_id,
            ServiceOrderCommand::AmendIntake(c) => c.order_id,
            ServiceOrderCommand::StartDiagnosis(c) => c.order_id,
            ServiceOrderCommand::AssignMechanic(c) => c.order_id,
            ServiceOrderCommand::AddItem(c) => c.order_id,
            ServiceOrderCommand::FlagMaintenance(c) => c.order_id,
            ServiceOrderCommand::RecordDiagnosis(c) => c.order_id,
            ServiceOrderCommand::GenerateBudget(c) => c.order_id,
            ServiceOrderCommand::ApproveBudget(c) => c.order_id,
            ServiceOrderCommand::FinishRepair(c) => c.order_id,
            ServiceOrderCommand::RecordPayment(c) => c.order_id,
            ServiceOrderCommand::Discard(c) => c.order_id,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ServiceOrderCommand::OpenOrder(_) => "open_order",
            ServiceOrderCommand::AmendIntake(_) => "amend_intake",
            ServiceOrderCommand::StartDiagnosis(_) => "start_diagnosis",
            ServiceOrderCommand::AssignMechanic(_) => "assign_mechanic",
            ServiceOrderCommand::AddItem(_) => "add_item",
            ServiceOrderCommand::FlagMaintenance(_) => "flag_maintenance",
            ServiceOrderCommand::RecordDiagnosis(_) => "record_diagnosis",
            ServiceOrderCommand::GenerateBudget(_) => "generate_budget",
            ServiceOrderCommand::ApproveBudget(_) => "approve_budget",
            ServiceOrderCommand::FinishRepair(_) => "finish_repair",
            ServiceOrderCommand::RecordPayment(_) => "record_payment",
            ServiceOrderCommand::Discard(_) => "discard",
        }
    }
}

impl Command for ServiceOrderCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        self.order_id().0
    }
}

/// Event: OrderOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOpened {
    pub order_id: OrderId,
    pub intake: Intake,
    pub occurred_at: DateTime<Utc>,
}

/// Event: IntakeAmended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeAmended {
    pub order_id: OrderId,
    pub intake: Intake,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DiagnosisStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisStarted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MechanicAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanicAssigned {
    pub order_id: OrderId,
    pub mechanic_id: MechanicId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub order_id: OrderId,
    pub item: BudgetItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MaintenanceFlagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceFlagged {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DiagnosisRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisRecorded {
    pub order_id: OrderId,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BudgetGenerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetGenerated {
    pub order_id: OrderId,
    pub mechanic_id: MechanicId,
    pub total: Money,
    pub tax_rate: TaxRate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BudgetApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetApproved {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RepairFinished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairFinished {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub warranty: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDiscarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDiscarded {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceOrderEvent {
    OrderOpened(OrderOpened),
    IntakeAmended(IntakeAmended),
    DiagnosisStarted(DiagnosisStarted),
    MechanicAssigned(MechanicAssigned),
    ItemAdded(ItemAdded),
    MaintenanceFlagged(MaintenanceFlagged),
    DiagnosisRecorded(DiagnosisRecorded),
    BudgetGenerated(BudgetGenerated),
    BudgetApproved(BudgetApproved),
    RepairFinished(RepairFinished),
    PaymentRecorded(PaymentRecorded),
    OrderDiscarded(OrderDiscarded),
}

impl ServiceOrderEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            ServiceOrderEvent::OrderOpened(e) => e.order_id,
            ServiceOrderEvent::IntakeAmended(e) => e.order_id,
            ServiceOrderEvent::DiagnosisStarted(e) => e.order_id,
            ServiceOrderEvent::MechanicAssigned(e) => e.order_id,
            ServiceOrderEvent::ItemAdded(e) => e.order_id,
            ServiceOrderEvent::MaintenanceFlagged(e) => e.order_id,
            ServiceOrderEvent::DiagnosisRecorded(e) => e.order_id,
            ServiceOrderEvent::BudgetGenerated(e) => e.order_id,
            ServiceOrderEvent::BudgetApproved(e) => e.order_id,
            ServiceOrderEvent::RepairFinished(e) => e.order_id,
            ServiceOrderEvent::PaymentRecorded(e) => e.order_id,
            ServiceOrderEvent::OrderDiscarded(e) => e.order_id,
        }
    }

    /// Status before and after this event.
    ///
    /// Edits that are not transitions only happen in Reception (intake) or in
    /// Diagnosis, so both ends are known from the event alone.
    pub fn transition(&self) -> (Option<OrderStatus>, OrderStatus) {
        use OrderStatus::*;
        match self {
            ServiceOrderEvent::OrderOpened(_) => (None, Reception),
            ServiceOrderEvent::IntakeAmended(_) => (Some(Reception), Reception),
            ServiceOrderEvent::DiagnosisStarted(_) => (Some(Reception), Diagnosis),
            ServiceOrderEvent::MechanicAssigned(_)
            | ServiceOrderEvent::ItemAdded(_)
            | ServiceOrderEvent::MaintenanceFlagged(_)
            | ServiceOrderEvent::DiagnosisRecorded(_) => (Some(Diagnosis), Diagnosis),
            ServiceOrderEvent::BudgetGenerated(_) => (Some(Diagnosis), PendingApproval),
            ServiceOrderEvent::BudgetApproved(_) => (Some(PendingApproval), InRepair),
            ServiceOrderEvent::RepairFinished(_) => (Some(InRepair), ReadyForPayment),
            ServiceOrderEvent::PaymentRecorded(_) => (Some(ReadyForPayment), Closed),
            ServiceOrderEvent::OrderDiscarded(e) => (Some(e.from), Cancelled),
        }
    }

    pub fn changes_status(&self) -> bool {
        let (before, after) = self.transition();
        before != Some(after)
    }
}

impl Event for ServiceOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ServiceOrderEvent::OrderOpened(_) => "service_order.opened",
            ServiceOrderEvent::IntakeAmended(_) => "service_order.intake_amended",
            ServiceOrderEvent::DiagnosisStarted(_) => "service_order.diagnosis_started",
            ServiceOrderEvent::MechanicAssigned(_) => "service_order.mechanic_assigned",
            ServiceOrderEvent::ItemAdded(_) => "service_order.item_added",
            ServiceOrderEvent::MaintenanceFlagged(_) => "service_order.maintenance_flagged",
            ServiceOrderEvent::DiagnosisRecorded(_) => "service_order.diagnosis_recorded",
            ServiceOrderEvent::BudgetGenerated(_) => "service_order.budget_generated",
            ServiceOrderEvent::BudgetApproved(_) => "service_order.budget_approved",
            ServiceOrderEvent::RepairFinished(_) => "service_order.repair_finished",
            ServiceOrderEvent::PaymentRecorded(_) => "service_order.payment_recorded",
            ServiceOrderEvent::OrderDiscarded(_) => "service_order.discarded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ServiceOrderEvent::OrderOpened(e) => e.occurred_at,
            ServiceOrderEvent::IntakeAmended(e) => e.occurred_at,
            ServiceOrderEvent::DiagnosisStarted(e) => e.occurred_at,
            ServiceOrderEvent::MechanicAssigned(e) => e.occurred_at,
            ServiceOrderEvent::ItemAdded(e) => e.occurred_at,
            ServiceOrderEvent::MaintenanceFlagged(e) => e.occurred_at,
            ServiceOrderEvent::DiagnosisRecorded(e) => e.occurred_at,
            ServiceOrderEvent::BudgetGenerated(e) => e.occurred_at,
            ServiceOrderEvent::BudgetApproved(e) => e.occurred_at,
            ServiceOrderEvent::RepairFinished(e) => e.occurred_at,
            ServiceOrderEvent::PaymentRecorded(e) => e.occurred_at,
            ServiceOrderEvent::OrderDiscarded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ServiceOrder {
    type Command = ServiceOrderCommand;
    type Event = ServiceOrderEvent;
    type Error = OrderError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ServiceOrderEvent::OrderOpened(e) => {
                self.id = e.order_id;
                self.intake = e.intake.clone();
                self.status = OrderStatus::Reception;
                self.budget = Budget::new();
                self.created_at = e.occurred_at;
                self.status_changed_at = e.occurred_at;
                self.created = true;
            }
            ServiceOrderEvent::IntakeAmended(e) => {
                self.intake = e.intake.clone();
            }
            ServiceOrderEvent::DiagnosisStarted(e) => {
                self.move_to(OrderStatus::Diagnosis, e.occurred_at);
            }
            ServiceOrderEvent::MechanicAssigned(e) => {
                self.mechanic_id = Some(e.mechanic_id);
            }
            ServiceOrderEvent::ItemAdded(e) => {
                self.budget.append(e.item.clone());
            }
            ServiceOrderEvent::MaintenanceFlagged(_) => {
                self.is_maintenance = true;
            }
            ServiceOrderEvent::DiagnosisRecorded(e) => {
                self.diagnosis_notes = Some(e.notes.clone());
            }
            ServiceOrderEvent::BudgetGenerated(e) => {
                self.mechanic_id = Some(e.mechanic_id);
                self.tax_rate = Some(e.tax_rate);
                self.budget.freeze();
                self.move_to(OrderStatus::PendingApproval, e.occurred_at);
            }
            ServiceOrderEvent::BudgetApproved(e) => {
                self.move_to(OrderStatus::InRepair, e.occurred_at);
            }
            ServiceOrderEvent::RepairFinished(e) => {
                self.move_to(OrderStatus::ReadyForPayment, e.occurred_at);
            }
            ServiceOrderEvent::PaymentRecorded(e) => {
                self.payment = Some(Payment {
                    method: e.method,
                    paid_at: e.occurred_at,
                    warranty: e.warranty.clone(),
                });
                self.move_to(OrderStatus::Closed, e.occurred_at);
            }
            ServiceOrderEvent::OrderDiscarded(e) => {
                self.cancelled_from = Some(e.from);
                self.discard_reason = e.reason.clone();
                self.move_to(OrderStatus::Cancelled, e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ServiceOrderCommand::OpenOrder(cmd) => self.handle_open(cmd),
            ServiceOrderCommand::AmendIntake(cmd) => self.handle_amend(cmd),
            ServiceOrderCommand::StartDiagnosis(cmd) => self.handle_start_diagnosis(cmd),
            ServiceOrderCommand::AssignMechanic(cmd) => self.handle_assign_mechanic(cmd),
            ServiceOrderCommand::AddItem(cmd) => self.handle_add_item(cmd),
            ServiceOrderCommand::FlagMaintenance(cmd) => self.handle_flag_maintenance(cmd),
            ServiceOrderCommand::RecordDiagnosis(cmd) => self.handle_record_diagnosis(cmd),
            ServiceOrderCommand::GenerateBudget(cmd) => self.handle_generate_budget(cmd),
            ServiceOrderCommand::ApproveBudget(cmd) => self.handle_approve(cmd),
            ServiceOrderCommand::FinishRepair(cmd) => self.handle_finish(cmd),
            ServiceOrderCommand::RecordPayment(cmd) => self.handle_payment(cmd),
            ServiceOrderCommand::Discard(cmd) => self.handle_discard(cmd),
        }
    }
}

impl ServiceOrder {
    fn move_to(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        self.status = status;
        self.status_changed_at = at;
    }

    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), OrderError> {
        if self.id != order_id {
            return Err(OrderError::WrongOrder {
                expected: self.id,
                found: order_id,
            });
        }
        Ok(())
    }

    fn ensure_exists(&self, order_id: OrderId) -> Result<(), OrderError> {
        if !self.created {
            return Err(OrderError::NotFound(order_id));
        }
        self.ensure_order_id(order_id)
    }

    /// Diagnosis-stage fields can only be touched while in Diagnosis.
    fn ensure_diagnosis_editable(&self, field: &'static str) -> Result<(), OrderError> {
        if !self.is_in_diagnosis() {
            return Err(OrderError::OrderFrozen {
                status: self.status,
                field,
            });
        }
        Ok(())
    }

    fn refuse(&self, requested: OrderStatus, reason: impl Into<String>) -> OrderError {
        OrderError::invalid_transition(Some(self.status), requested, reason)
    }

    fn handle_open(&self, cmd: &OpenOrder) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        if self.created {
            return Err(OrderError::AlreadyExists(self.id));
        }
        self.ensure_order_id(cmd.order_id)?;

        let intake = cmd
            .intake
            .normalized()
            .map_err(|reason| OrderError::invalid_transition(None, OrderStatus::Reception, reason))?;

        Ok(vec![ServiceOrderEvent::OrderOpened(OrderOpened {
            order_id: cmd.order_id,
            intake,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_amend(&self, cmd: &AmendIntake) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        self.ensure_exists(cmd.order_id)?;

        if self.status != OrderStatus::Reception {
            return Err(OrderError::OrderFrozen {
                status: self.status,
                field: "intake",
            });
        }

        let intake = cmd
            .intake
            .normalized()
            .map_err(|reason| self.refuse(OrderStatus::Reception, reason))?;
        if intake == self.intake {
            return Ok(Vec::new());
        }

        Ok(vec![ServiceOrderEvent::IntakeAmended(IntakeAmended {
            order_id: cmd.order_id,
            intake,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start_diagnosis(
        &self,
        cmd: &StartDiagnosis,
    ) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        self.ensure_exists(cmd.order_id)?;

        if self.status != OrderStatus::Reception {
            return Err(self.refuse(OrderStatus::Diagnosis, "order has already left reception"));
        }

        Ok(vec![ServiceOrderEvent::DiagnosisStarted(DiagnosisStarted {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_mechanic(
        &self,
        cmd: &AssignMechanic,
    ) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_diagnosis_editable("mechanic")?;

        if self.mechanic_id == Some(cmd.mechanic_id) {
            return Ok(Vec::new());
        }

        Ok(vec![ServiceOrderEvent::MechanicAssigned(MechanicAssigned {
            order_id: cmd.order_id,
            mechanic_id: cmd.mechanic_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_diagnosis_editable("items")?;

        let item = self
            .budget
            .prepare(&cmd.description, cmd.kind, cmd.price)
            .map_err(|err| match err {
                BudgetError::Frozen => OrderError::OrderFrozen {
                    status: self.status,
                    field: "items",
                },
                BudgetError::Item(item) => OrderError::InvalidItem(item),
            })?;

        Ok(vec![ServiceOrderEvent::ItemAdded(ItemAdded {
            order_id: cmd.order_id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_flag_maintenance(
        &self,
        cmd: &FlagMaintenance,
    ) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_diagnosis_editable("maintenance")?;

        // The flag is never reverted, so a second flag changes nothing.
        if self.is_maintenance {
            return Ok(Vec::new());
        }

        Ok(vec![ServiceOrderEvent::MaintenanceFlagged(MaintenanceFlagged {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Notes stay editable for the whole Diagnosis stage; each recording
    /// replaces the previous text. They freeze with the budget.
    fn handle_record_diagnosis(
        &self,
        cmd: &RecordDiagnosis,
    ) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_diagnosis_editable("diagnosis_notes")?;

        let notes = cmd.notes.trim();
        if self.diagnosis_notes.as_deref() == Some(notes) {
            return Ok(Vec::new());
        }

        Ok(vec![ServiceOrderEvent::DiagnosisRecorded(DiagnosisRecorded {
            order_id: cmd.order_id,
            notes: notes.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_generate_budget(
        &self,
        cmd: &GenerateBudget,
    ) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        self.ensure_exists(cmd.order_id)?;

        if self.budget.is_frozen() {
            return Err(OrderError::OrderFrozen {
                status: self.status,
                field: "budget",
            });
        }
        if !self.is_in_diagnosis() {
            return Err(self.refuse(
                OrderStatus::PendingApproval,
                "a budget can only be generated during diagnosis",
            ));
        }
        let Some(mechanic_id) = self.mechanic_id else {
            return Err(self.refuse(OrderStatus::PendingApproval, "no mechanic assigned"));
        };
        if self.budget.is_empty() {
            return Err(self.refuse(OrderStatus::PendingApproval, "budget has no items"));
        }

        Ok(vec![ServiceOrderEvent::BudgetGenerated(BudgetGenerated {
            order_id: cmd.order_id,
            mechanic_id,
            total: self.budget.total(),
            tax_rate: cmd.tax_rate,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveBudget) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        self.ensure_exists(cmd.order_id)?;

        if self.status != OrderStatus::PendingApproval {
            return Err(self.refuse(OrderStatus::InRepair, "budget is not pending approval"));
        }

        Ok(vec![ServiceOrderEvent::BudgetApproved(BudgetApproved {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_finish(&self, cmd: &FinishRepair) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        self.ensure_exists(cmd.order_id)?;

        if self.status != OrderStatus::InRepair {
            return Err(self.refuse(OrderStatus::ReadyForPayment, "order is not in repair"));
        }

        Ok(vec![ServiceOrderEvent::RepairFinished(RepairFinished {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_payment(&self, cmd: &RecordPayment) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        self.ensure_exists(cmd.order_id)?;
        self.check_payable()?;

        let Some(method) = cmd.method else {
            return Err(self.refuse(OrderStatus::Closed, "payment method is required"));
        };

        let warranty = cmd
            .warranty
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string);

        Ok(vec![ServiceOrderEvent::PaymentRecorded(PaymentRecorded {
            order_id: cmd.order_id,
            method,
            warranty,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_discard(&self, cmd: &Discard) -> Result<Vec<ServiceOrderEvent>, OrderError> {
        self.ensure_exists(cmd.order_id)?;

        if !self.status.is_cancellable() {
            let reason = match self.status {
                OrderStatus::Reception => "order has not been submitted to diagnosis".to_string(),
                OrderStatus::ReadyForPayment => {
                    "repair is finished; the order can only be paid".to_string()
                }
                other => format!("order is already {other}"),
            };
            return Err(self.refuse(OrderStatus::Cancelled, reason));
        }

        let reason = cmd
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        Ok(vec![ServiceOrderEvent::OrderDiscarded(OrderDiscarded {
            order_id: cmd.order_id,
            from: self.status,
            reason,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoshop_mechanics::InMemoryMechanicRegistry;
    use proptest::prelude::*;

    fn test_order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn intake(plate: &str) -> Intake {
        Intake {
            customer: Customer {
                name: "Maria Perez".to_string(),
                phone: Some("555-0101".to_string()),
                email: None,
            },
            vehicle: Vehicle {
                brand: "Toyota".to_string(),
                model: "Corolla".to_string(),
                year: Some(2015),
                plate: plate.to_string(),
            },
            reported_issue: "Brakes squeal".to_string(),
        }
    }

    fn exec(order: &mut ServiceOrder, cmd: ServiceOrderCommand) -> Result<(), OrderError> {
        autoshop_events::execute(order, &cmd).map(|_| ())
    }

    fn opened() -> ServiceOrder {
        let id = test_order_id();
        let mut order = ServiceOrder::empty(id);
        exec(
            &mut order,
            ServiceOrderCommand::OpenOrder(OpenOrder {
                order_id: id,
                intake: intake("ABC-123"),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        order
    }

    fn in_diagnosis() -> ServiceOrder {
        let mut order = opened();
        let order_id = order.id_typed();
        exec(
            &mut order,
            ServiceOrderCommand::StartDiagnosis(StartDiagnosis {
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        order
    }

    fn add_item(order: &mut ServiceOrder, kind: ItemKind, price: i64) -> Result<(), OrderError> {
        let order_id = order.id_typed();
        exec(
            order,
            ServiceOrderCommand::AddItem(AddItem {
                order_id,
                description: format!("{} line", kind.as_str()),
                kind,
                price,
                occurred_at: test_time(),
            }),
        )
    }

    fn assign(order: &mut ServiceOrder, mechanic_id: MechanicId) -> Result<(), OrderError> {
        let order_id = order.id_typed();
        exec(
            order,
            ServiceOrderCommand::AssignMechanic(AssignMechanic {
                order_id,
                mechanic_id,
                occurred_at: test_time(),
            }),
        )
    }

    fn generate(order: &mut ServiceOrder) -> Result<(), OrderError> {
        let order_id = order.id_typed();
        exec(
            order,
            ServiceOrderCommand::GenerateBudget(GenerateBudget {
                order_id,
                tax_rate: TaxRate::from_bps(1800),
                occurred_at: test_time(),
            }),
        )
    }

    fn simple(order: &mut ServiceOrder, make: fn(OrderId) -> ServiceOrderCommand) -> Result<(), OrderError> {
        let cmd = make(order.id_typed());
        exec(order, cmd)
    }

    fn approve(id: OrderId) -> ServiceOrderCommand {
        ServiceOrderCommand::ApproveBudget(ApproveBudget {
            order_id: id,
            occurred_at: test_time(),
        })
    }

    fn finish(id: OrderId) -> ServiceOrderCommand {
        ServiceOrderCommand::FinishRepair(FinishRepair {
            order_id: id,
            occurred_at: test_time(),
        })
    }

    fn pay_cash(id: OrderId) -> ServiceOrderCommand {
        ServiceOrderCommand::RecordPayment(RecordPayment {
            order_id: id,
            method: Some(PaymentMethod::Cash),
            warranty: Some("3 months on parts".to_string()),
            occurred_at: test_time(),
        })
    }

    fn discard(id: OrderId) -> ServiceOrderCommand {
        ServiceOrderCommand::Discard(Discard {
            order_id: id,
            reason: Some("customer declined".to_string()),
            occurred_at: test_time(),
        })
    }

    fn pending_approval() -> ServiceOrder {
        let mut order = in_diagnosis();
        add_item(&mut order, ItemKind::Part, 15_000).unwrap();
        add_item(&mut order, ItemKind::Labor, 5_000).unwrap();
        assign(&mut order, MechanicId::new()).unwrap();
        generate(&mut order).unwrap();
        order
    }

    #[test]
    fn open_order_emits_order_opened_in_reception() {
        let order = opened();
        assert!(order.is_created());
        assert_eq!(order.status(), OrderStatus::Reception);
        assert_eq!(order.vehicle().plate, "ABC-123");
        assert_eq!(order.version(), 1);
        assert_eq!(order.created_at(), order.status_changed_at());
    }

    #[test]
    fn open_order_requires_intake_fields() {
        let id = test_order_id();
        let order = ServiceOrder::empty(id);
        let mut bad = intake("   ");
        bad.customer.name = "Maria".to_string();

        let err = order
            .handle(&ServiceOrderCommand::OpenOrder(OpenOrder {
                order_id: id,
                intake: bad,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            OrderError::InvalidTransition {
                current: None,
                requested: OrderStatus::Reception,
                reason,
            } => assert!(reason.contains("plate")),
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn opening_twice_is_rejected() {
        let order = opened();
        let err = order
            .handle(&ServiceOrderCommand::OpenOrder(OpenOrder {
                order_id: order.id_typed(),
                intake: intake("XYZ-999"),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, OrderError::AlreadyExists(order.id_typed()));
    }

    #[test]
    fn commands_on_missing_order_are_not_found() {
        let id = test_order_id();
        let order = ServiceOrder::empty(id);
        let err = order.handle(&approve(id)).unwrap_err();
        assert_eq!(err, OrderError::NotFound(id));
    }

    #[test]
    fn intake_is_amendable_only_in_reception() {
        let mut order = opened();
        let order_id = order.id_typed();
        exec(
            &mut order,
            ServiceOrderCommand::AmendIntake(AmendIntake {
                order_id,
                intake: intake("ABC-124"),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.vehicle().plate, "ABC-124");

        let mut order = in_diagnosis();
        let order_id = order.id_typed();
        let err = exec(
            &mut order,
            ServiceOrderCommand::AmendIntake(AmendIntake {
                order_id,
                intake: intake("ABC-125"),
                occurred_at: test_time(),
            }),
        )
        .unwrap_err();
        assert_eq!(
            err,
            OrderError::OrderFrozen {
                status: OrderStatus::Diagnosis,
                field: "intake"
            }
        );
    }

    #[test]
    fn add_item_recomputes_total() {
        let mut order = in_diagnosis();
        add_item(&mut order, ItemKind::Part, 15_000).unwrap();
        add_item(&mut order, ItemKind::Labor, 5_000).unwrap();

        assert_eq!(order.items().len(), 2);
        assert_eq!(order.items()[1].line_no, 2);
        assert_eq!(order.total(), Money::from_cents(20_000));
    }

    #[test]
    fn add_item_rejects_negative_price_and_empty_description() {
        let mut order = in_diagnosis();
        let err = add_item(&mut order, ItemKind::Part, -1).unwrap_err();
        assert!(matches!(err, OrderError::InvalidItem(ref e) if e.field() == "price"));

        let order_id = order.id_typed();
        let err = exec(
            &mut order,
            ServiceOrderCommand::AddItem(AddItem {
                order_id,
                description: "  ".to_string(),
                kind: ItemKind::Labor,
                price: 100,
                occurred_at: test_time(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::InvalidItem(ref e) if e.field() == "description"));
        assert!(order.items().is_empty());
    }

    #[test]
    fn diagnosis_edits_outside_diagnosis_are_frozen() {
        let mut order = opened();
        let err = add_item(&mut order, ItemKind::Part, 100).unwrap_err();
        assert_eq!(
            err,
            OrderError::OrderFrozen {
                status: OrderStatus::Reception,
                field: "items"
            }
        );

        let mut order = pending_approval();
        let err = add_item(&mut order, ItemKind::Part, 100).unwrap_err();
        assert!(matches!(err, OrderError::OrderFrozen { field: "items", .. }));
        let err = assign(&mut order, MechanicId::new()).unwrap_err();
        assert!(matches!(err, OrderError::OrderFrozen { field: "mechanic", .. }));
    }

    #[test]
    fn scenario_budget_of_part_and_labor_totals_200() {
        let order = pending_approval();
        assert_eq!(order.total(), Money::from_cents(20_000));
        assert_eq!(order.total().to_string(), "200.00");
        assert_eq!(order.status(), OrderStatus::PendingApproval);
        assert!(order.budget().is_frozen());
    }

    #[test]
    fn generate_budget_requires_mechanic_and_items() {
        let mut order = in_diagnosis();
        add_item(&mut order, ItemKind::Part, 100).unwrap();
        let err = generate(&mut order).unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition { ref reason, requested: OrderStatus::PendingApproval, .. }
                if reason == "no mechanic assigned"
        ));

        let mut order = in_diagnosis();
        assign(&mut order, MechanicId::new()).unwrap();
        let err = generate(&mut order).unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition { ref reason, .. } if reason == "budget has no items"
        ));
    }

    #[test]
    fn generate_budget_twice_is_frozen() {
        let mut order = pending_approval();
        let err = generate(&mut order).unwrap_err();
        assert_eq!(
            err,
            OrderError::OrderFrozen {
                status: OrderStatus::PendingApproval,
                field: "budget"
            }
        );
    }

    #[test]
    fn full_lifecycle_to_closed_records_payment() {
        let mut order = pending_approval();
        simple(&mut order, approve).unwrap();
        assert_eq!(order.status(), OrderStatus::InRepair);
        simple(&mut order, finish).unwrap();
        assert_eq!(order.status(), OrderStatus::ReadyForPayment);
        assert_eq!(order.payment_method(), None);
        simple(&mut order, pay_cash).unwrap();

        assert_eq!(order.status(), OrderStatus::Closed);
        assert_eq!(order.payment_method(), Some(PaymentMethod::Cash));
        assert_eq!(order.payment_method().unwrap().as_str(), "cash");
    }

    #[test]
    fn pay_requires_ready_for_payment_and_a_method() {
        let mut order = pending_approval();
        let err = simple(&mut order, pay_cash).unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition {
                current: Some(OrderStatus::PendingApproval),
                requested: OrderStatus::Closed,
                ..
            }
        ));

        simple(&mut order, approve).unwrap();
        simple(&mut order, finish).unwrap();
        let order_id = order.id_typed();
        let err = exec(
            &mut order,
            ServiceOrderCommand::RecordPayment(RecordPayment {
                order_id,
                method: None,
                warranty: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("payment method is required"));
    }

    #[test]
    fn discard_from_each_cancellable_stage() {
        let mut from_diagnosis = in_diagnosis();
        simple(&mut from_diagnosis, discard).unwrap();
        assert_eq!(from_diagnosis.status(), OrderStatus::Cancelled);
        assert_eq!(from_diagnosis.cancelled_from(), Some(OrderStatus::Diagnosis));
        assert_eq!(from_diagnosis.discard_reason(), Some("customer declined"));

        let mut from_pending = pending_approval();
        simple(&mut from_pending, discard).unwrap();
        assert_eq!(from_pending.status(), OrderStatus::Cancelled);

        let mut from_repair = pending_approval();
        simple(&mut from_repair, approve).unwrap();
        simple(&mut from_repair, discard).unwrap();
        assert_eq!(from_repair.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn discard_keeps_diagnosis_notes() {
        let mut order = in_diagnosis();
        let order_id = order.id_typed();
        exec(
            &mut order,
            ServiceOrderCommand::RecordDiagnosis(RecordDiagnosis {
                order_id,
                notes: "Worn front pads".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        simple(&mut order, discard).unwrap();
        assert_eq!(order.diagnosis_notes(), Some("Worn front pads"));
    }

    #[test]
    fn diagnosis_notes_can_be_rewritten_until_the_budget() {
        let mut order = in_diagnosis();
        let order_id = order.id_typed();
        let note = |notes: &str| {
            ServiceOrderCommand::RecordDiagnosis(RecordDiagnosis {
                order_id,
                notes: notes.to_string(),
                occurred_at: test_time(),
            })
        };

        exec(&mut order, note("Squeal from the front")).unwrap();
        exec(&mut order, note("  Worn front pads, rotors fine  ")).unwrap();
        assert_eq!(order.diagnosis_notes(), Some("Worn front pads, rotors fine"));

        assign(&mut order, MechanicId::new()).unwrap();
        add_item(&mut order, ItemKind::Part, 15_000).unwrap();
        generate(&mut order).unwrap();

        let err = exec(&mut order, note("Changed my mind")).unwrap_err();
        assert!(matches!(
            err,
            OrderError::OrderFrozen { status: OrderStatus::PendingApproval, field: "diagnosis_notes" }
        ));
        assert_eq!(order.diagnosis_notes(), Some("Worn front pads, rotors fine"));
    }

    #[test]
    fn check_payable_only_passes_at_the_cashier() {
        let mut order = pending_approval();
        assert!(matches!(
            order.check_payable(),
            Err(OrderError::InvalidTransition { requested: OrderStatus::Closed, .. })
        ));
        simple(&mut order, approve).unwrap();
        simple(&mut order, finish).unwrap();
        assert!(order.check_payable().is_ok());
        simple(&mut order, pay_cash).unwrap();
        assert!(order.check_payable().is_err());
    }

    #[test]
    fn discard_is_refused_outside_cancellable_stages() {
        let mut order = opened();
        assert!(simple(&mut order, discard).is_err());

        let mut order = pending_approval();
        simple(&mut order, approve).unwrap();
        simple(&mut order, finish).unwrap();
        let err = simple(&mut order, discard).unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition {
                current: Some(OrderStatus::ReadyForPayment),
                requested: OrderStatus::Cancelled,
                ..
            }
        ));

        simple(&mut order, pay_cash).unwrap();
        assert!(simple(&mut order, discard).is_err());
    }

    #[test]
    fn repeated_maintenance_flag_is_a_no_op() {
        let mut order = in_diagnosis();
        let order_id = order.id_typed();
        let flag = ServiceOrderCommand::FlagMaintenance(FlagMaintenance {
            order_id,
            occurred_at: test_time(),
        });
        exec(&mut order, flag.clone()).unwrap();
        let version = order.version();

        assert!(order.handle(&flag).unwrap().is_empty());
        assert!(order.is_maintenance());
        assert_eq!(order.version(), version);
    }

    #[test]
    fn invoice_is_identical_at_approval_and_after_payment() {
        let registry = InMemoryMechanicRegistry::new();
        let mech = registry.add("Luis", "MEC-001").unwrap();

        let mut order = in_diagnosis();
        add_item(&mut order, ItemKind::Part, 15_000).unwrap();
        add_item(&mut order, ItemKind::Labor, 5_000).unwrap();
        assign(&mut order, mech).unwrap();
        assert!(order.invoice(&registry).is_err());
        generate(&mut order).unwrap();

        let at_approval = order.invoice(&registry).unwrap();
        simple(&mut order, approve).unwrap();
        simple(&mut order, finish).unwrap();
        assert!(order.receipt(&registry).is_err());
        simple(&mut order, pay_cash).unwrap();

        let receipt = order.receipt(&registry).unwrap();
        assert_eq!(receipt.invoice, at_approval);
        assert_eq!(at_approval.tax, Money::from_cents(3_600));
        assert_eq!(at_approval.mechanic.as_ref().map(|m| m.code.as_str()), Some("MEC-001"));
        assert_eq!(receipt.warranty.as_deref(), Some("3 months on parts"));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let order = in_diagnosis();
        let before = order.clone();
        let order_id = order.id_typed();
        let cmd = ServiceOrderCommand::AddItem(AddItem {
            order_id,
            description: "Oil".to_string(),
            kind: ItemKind::Part,
            price: 2_500,
            occurred_at: test_time(),
        });

        let first = order.handle(&cmd).unwrap();
        let second = order.handle(&cmd).unwrap();
        assert_eq!(first, second);
        assert_eq!(order, before);
    }

    #[test]
    fn command_for_another_order_is_rejected() {
        let order = in_diagnosis();
        let other = test_order_id();
        let err = order.handle(&approve(other)).unwrap_err();
        assert_eq!(
            err,
            OrderError::WrongOrder {
                expected: order.id_typed(),
                found: other
            }
        );
    }

    #[test]
    fn events_report_the_transition_they_make() {
        let mut order = in_diagnosis();
        add_item(&mut order, ItemKind::Part, 100).unwrap();
        assign(&mut order, MechanicId::new()).unwrap();
        let order_id = order.id_typed();
        let events = order
            .handle(&ServiceOrderCommand::GenerateBudget(GenerateBudget {
                order_id,
                tax_rate: TaxRate::ZERO,
                occurred_at: test_time(),
            }))
            .unwrap();

        assert_eq!(
            events[0].transition(),
            (Some(OrderStatus::Diagnosis), OrderStatus::PendingApproval)
        );
        assert!(events[0].changes_status());
        assert_eq!(events[0].event_type(), "service_order.budget_generated");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Submit,
        Assign,
        Add(ItemKind, i64),
        Flag,
        Generate,
        Approve,
        Finish,
        Pay,
        Discard,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Submit),
            Just(Op::Assign),
            (any::<bool>(), -500i64..50_000).prop_map(|(part, price)| {
                Op::Add(if part { ItemKind::Part } else { ItemKind::Labor }, price)
            }),
            Just(Op::Flag),
            Just(Op::Generate),
            Just(Op::Approve),
            Just(Op::Finish),
            Just(Op::Pay),
            Just(Op::Discard),
        ]
    }

    fn rank(status: OrderStatus) -> u8 {
        match status {
            OrderStatus::Reception => 0,
            OrderStatus::Diagnosis => 1,
            OrderStatus::PendingApproval => 2,
            OrderStatus::InRepair => 3,
            OrderStatus::ReadyForPayment => 4,
            OrderStatus::Closed => 5,
            OrderStatus::Cancelled => 6,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn lifecycle_invariants_hold_for_any_command_sequence(ops in prop::collection::vec(op(), 0..40)) {
            let mut order = opened();
            let order_id = order.id_typed();
            let mechanic = MechanicId::new();
            let mut frozen_total: Option<Money> = None;

            for op in ops {
                let before = order.status();
                let cmd = match op {
                    Op::Submit => ServiceOrderCommand::StartDiagnosis(StartDiagnosis { order_id, occurred_at: test_time() }),
                    Op::Assign => ServiceOrderCommand::AssignMechanic(AssignMechanic { order_id, mechanic_id: mechanic, occurred_at: test_time() }),
                    Op::Add(kind, price) => ServiceOrderCommand::AddItem(AddItem { order_id, description: "line".to_string(), kind, price, occurred_at: test_time() }),
                    Op::Flag => ServiceOrderCommand::FlagMaintenance(FlagMaintenance { order_id, occurred_at: test_time() }),
                    Op::Generate => ServiceOrderCommand::GenerateBudget(GenerateBudget { order_id, tax_rate: TaxRate::from_bps(1800), occurred_at: test_time() }),
                    Op::Approve => approve(order_id),
                    Op::Finish => finish(order_id),
                    Op::Pay => pay_cash(order_id),
                    Op::Discard => discard(order_id),
                };
                let _ = exec(&mut order, cmd);

                let sum: u64 = order.items().iter().map(|i| i.price.cents()).sum();
                prop_assert_eq!(order.total().cents(), sum);
                prop_assert_eq!(order.payment().is_some(), order.status() == OrderStatus::Closed);

                if before == OrderStatus::Cancelled || before == OrderStatus::Closed {
                    prop_assert_eq!(order.status(), before);
                } else if order.status() != OrderStatus::Cancelled {
                    prop_assert!(rank(order.status()) >= rank(before));
                }

                if order.budget().is_frozen() {
                    match frozen_total {
                        Some(t) => prop_assert_eq!(order.total(), t),
                        None => frozen_total = Some(order.total()),
                    }
                }
            }
        }
    }
}
