//! Budget engine: line items, derived totals and the invoice projection.
//!
//! Amounts are integer minor units (cents) so totals are exact and an invoice
//! computed at approval time is bit-identical to the one printed at payment.

pub mod budget;
pub mod invoice;
pub mod item;
pub mod money;

pub use budget::{Budget, BudgetError};
pub use invoice::{Invoice, compute_invoice};
pub use item::{BudgetItem, ItemError, ItemKind};
pub use money::{Money, MoneyParseError, TaxRate};
