//! Service order lifecycle (event-sourced).
//!
//! The `ServiceOrder` aggregate owns every rule about what may happen to an
//! order and when: intake, diagnosis edits, budget generation, approval,
//! repair, payment and cancellation. It is pure decision logic; storage,
//! locking and queries live in `autoshop-infra`.

pub mod error;
pub mod intake;
pub mod order;
pub mod status;

pub use error::OrderError;
pub use intake::{Customer, Intake, Vehicle};
pub use order::{
    AddItem, AmendIntake, ApproveBudget, AssignMechanic, BudgetApproved, BudgetGenerated,
    DiagnosisRecorded, DiagnosisStarted, Discard, FinishRepair, FlagMaintenance, GenerateBudget,
    IntakeAmended, ItemAdded, MaintenanceFlagged, MechanicAssigned, OpenOrder, OrderDiscarded,
    OrderId, OrderOpened, Payment, PaymentRecorded, Receipt, RecordDiagnosis, RecordPayment,
    RepairFinished, ServiceOrder, ServiceOrderCommand, ServiceOrderEvent, StartDiagnosis,
    AGGREGATE_TYPE,
};
pub use status::{OrderStatus, PaymentMethod};
