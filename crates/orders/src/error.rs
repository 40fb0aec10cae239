use thiserror::Error;

use autoshop_budget::ItemError;

use crate::order::OrderId;
use crate::status::OrderStatus;

/// Why the lifecycle refused a command.
///
/// Each variant carries what a station needs to explain the refusal: the
/// current state, the state that was asked for, and the unmet condition or
/// the offending field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("cannot move order from {} to {requested}: {reason}", origin(.current))]
    InvalidTransition {
        /// `None` when the order does not exist yet (intake).
        current: Option<OrderStatus>,
        requested: OrderStatus,
        reason: String,
    },

    #[error("{field} cannot be changed while the order is {status}")]
    OrderFrozen {
        status: OrderStatus,
        field: &'static str,
    },

    #[error("invalid budget item ({field}): {0}", field = .0.field())]
    InvalidItem(#[from] ItemError),

    #[error("service order {0} not found")]
    NotFound(OrderId),

    #[error("service order {0} already exists")]
    AlreadyExists(OrderId),

    #[error("command for order {found} routed to order {expected}")]
    WrongOrder { expected: OrderId, found: OrderId },
}

fn origin(current: &Option<OrderStatus>) -> &'static str {
    current.map(OrderStatus::label).unwrap_or("(new)")
}

impl OrderError {
    pub fn invalid_transition(
        current: Option<OrderStatus>,
        requested: OrderStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            current,
            requested,
            reason: reason.into(),
        }
    }
}
