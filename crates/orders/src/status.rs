use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where an order is in the shop's workflow.
///
/// ```text
/// Reception → Diagnosis → PendingApproval → InRepair → ReadyForPayment → Closed
///                  └──────────┴──────────────┴──→ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Reception,
    Diagnosis,
    PendingApproval,
    InRepair,
    ReadyForPayment,
    Closed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Reception,
        OrderStatus::Diagnosis,
        OrderStatus::PendingApproval,
        OrderStatus::InRepair,
        OrderStatus::ReadyForPayment,
        OrderStatus::Closed,
        OrderStatus::Cancelled,
    ];

    /// Statuses that have a working queue at some station.
    pub const ACTIVE: [OrderStatus; 5] = [
        OrderStatus::Reception,
        OrderStatus::Diagnosis,
        OrderStatus::PendingApproval,
        OrderStatus::InRepair,
        OrderStatus::ReadyForPayment,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Closed | OrderStatus::Cancelled)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Statuses from which an order may be discarded.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            OrderStatus::Diagnosis | OrderStatus::PendingApproval | OrderStatus::InRepair
        )
    }

    /// Stable machine name (matches the serde form).
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Reception => "reception",
            OrderStatus::Diagnosis => "diagnosis",
            OrderStatus::PendingApproval => "pending_approval",
            OrderStatus::InRepair => "in_repair",
            OrderStatus::ReadyForPayment => "ready_for_payment",
            OrderStatus::Closed => "closed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Badge text shown at the stations.
    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Reception => "Reception",
            OrderStatus::Diagnosis => "Diagnosis",
            OrderStatus::PendingApproval => "Pending Approval",
            OrderStatus::InRepair => "In Repair",
            OrderStatus::ReadyForPayment => "Ready for Payment",
            OrderStatus::Closed => "Closed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    /// Accepts the machine name or the badge text, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace([' ', '-'], "_");
        OrderStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| format!("unknown order status '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Transfer => "transfer",
        }
    }
}

impl core::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "card" | "credit" | "debit" => Ok(PaymentMethod::Card),
            "transfer" | "bank_transfer" => Ok(PaymentMethod::Transfer),
            other => Err(format!("unknown payment method '{other}'")),
        }
    }
}
