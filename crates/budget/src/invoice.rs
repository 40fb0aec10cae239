use serde::{Deserialize, Serialize};

use autoshop_core::AggregateId;
use autoshop_mechanics::{Mechanic, MechanicId, MechanicRegistry};

use crate::budget::Budget;
use crate::item::BudgetItem;
use crate::money::{Money, TaxRate};

/// Read-only projection of an order's budget, shown for approval and printed
/// on the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub order_id: AggregateId,
    pub items: Vec<BudgetItem>,
    pub total: Money,
    pub tax_rate: TaxRate,
    pub tax: Money,
    pub amount_due: Money,
    /// Current registry entry for the assigned mechanic.
    pub mechanic: Option<Mechanic>,
    pub maintenance: bool,
}

/// Build the invoice projection. Pure: it only reads the budget and the registry.
pub fn compute_invoice<R>(
    order_id: AggregateId,
    budget: &Budget,
    tax_rate: TaxRate,
    mechanic_id: Option<MechanicId>,
    maintenance: bool,
    registry: &R,
) -> Invoice
where
    R: MechanicRegistry + ?Sized,
{
    let total = budget.total();
    let tax = tax_rate.tax_on(total);
    Invoice {
        order_id,
        items: budget.items().to_vec(),
        total,
        tax_rate,
        tax,
        amount_due: total.checked_add(tax).unwrap_or(Money::from_cents(u64::MAX)),
        mechanic: mechanic_id.and_then(|id| registry.get(id)),
        maintenance,
    }
}
