//! The error taxonomy stations see.
//!
//! Lower layers keep their own error types (`OrderError`, `RegistryError`,
//! `EventStoreError`, `DispatchError`). Everything a station adapter returns
//! is folded into `ShopError` here so a caller can tell retryable conflicts
//! apart from refusals it must show to the user.

use thiserror::Error;

use autoshop_core::DomainError;
use autoshop_mechanics::RegistryError;
use autoshop_orders::{OrderError, OrderStatus};

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShopError {
    /// The lifecycle does not allow this move from the current state.
    #[error("cannot move order from {} to {requested}: {reason}", origin(.current))]
    InvalidTransition {
        current: Option<OrderStatus>,
        requested: OrderStatus,
        reason: String,
    },

    #[error("{field} cannot be changed while the order is {status}")]
    OrderFrozen {
        status: OrderStatus,
        field: &'static str,
    },

    #[error("invalid budget item ({field}): {reason}")]
    InvalidItem { field: &'static str, reason: String },

    /// Malformed station input outside of budget items.
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("mechanic code '{code}' is already registered")]
    DuplicateCode { code: String },

    /// Someone else changed the order first. Re-read and try again.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A collaborator did not answer in time. Retryable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("stored data could not be decoded: {0}")]
    Deserialize(String),
}

pub type ShopResult<T> = Result<T, ShopError>;

fn origin(current: &Option<OrderStatus>) -> &'static str {
    current.map(OrderStatus::label).unwrap_or("(new)")
}

impl ShopError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    /// Whether re-reading and repeating the same request can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShopError::Conflict(_) | ShopError::Unavailable(_))
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ShopError::InvalidTransition { .. } => "invalid_transition",
            ShopError::OrderFrozen { .. } => "order_frozen",
            ShopError::InvalidItem { .. } => "invalid_item",
            ShopError::InvalidInput { .. } => "invalid_input",
            ShopError::DuplicateCode { .. } => "duplicate_code",
            ShopError::Conflict(_) => "conflict",
            ShopError::NotFound { .. } => "not_found",
            ShopError::Unavailable(_) => "unavailable",
            ShopError::Store(_) => "store_error",
            ShopError::Deserialize(_) => "deserialize_error",
        }
    }
}

impl From<OrderError> for ShopError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition {
                current,
                requested,
                reason,
            } => ShopError::InvalidTransition {
                current,
                requested,
                reason,
            },
            OrderError::OrderFrozen { status, field } => ShopError::OrderFrozen { status, field },
            OrderError::InvalidItem(item) => ShopError::InvalidItem {
                field: item.field(),
                reason: item.to_string(),
            },
            OrderError::NotFound(id) => ShopError::not_found("service order", id),
            OrderError::AlreadyExists(id) => {
                ShopError::Conflict(format!("service order {id} already exists"))
            }
            other @ OrderError::WrongOrder { .. } => ShopError::Store(other.to_string()),
        }
    }
}

impl From<DispatchError<OrderError>> for ShopError {
    fn from(err: DispatchError<OrderError>) -> Self {
        match err {
            DispatchError::Concurrency(msg) => ShopError::Conflict(msg),
            DispatchError::Domain(e) => e.into(),
            DispatchError::Deserialize(msg) => ShopError::Deserialize(msg),
            DispatchError::Store(e) => e.into(),
        }
    }
}

impl From<EventStoreError> for ShopError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::Concurrency(msg) => ShopError::Conflict(msg),
            EventStoreError::Unavailable(msg) => ShopError::Unavailable(msg),
            other => ShopError::Store(other.to_string()),
        }
    }
}

impl From<RegistryError> for ShopError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateCode { code } => ShopError::DuplicateCode { code },
            RegistryError::MissingField { field } => {
                ShopError::invalid_input(field, format!("mechanic {field} must not be empty"))
            }
            RegistryError::Unavailable(msg) => ShopError::Unavailable(msg),
        }
    }
}

impl From<DomainError> for ShopError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => ShopError::invalid_input("input", msg),
            DomainError::InvalidId(msg) => ShopError::invalid_input("id", msg),
            DomainError::NotFound { entity, id } => ShopError::NotFound { entity, id },
            DomainError::Conflict(msg) => ShopError::Conflict(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoshop_budget::ItemError;
    use autoshop_core::AggregateId;
    use autoshop_orders::OrderId;

    #[test]
    fn lifecycle_refusals_keep_their_detail() {
        let err: ShopError = OrderError::invalid_transition(
            Some(OrderStatus::Diagnosis),
            OrderStatus::PendingApproval,
            "no mechanic assigned",
        )
        .into();
        assert_eq!(
            err.to_string(),
            "cannot move order from Diagnosis to Pending Approval: no mechanic assigned"
        );
        assert_eq!(err.kind(), "invalid_transition");
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_items_name_the_field() {
        let err: ShopError = OrderError::InvalidItem(ItemError::NegativePrice(-5)).into();
        match err {
            ShopError::InvalidItem { field, reason } => {
                assert_eq!(field, "price");
                assert!(reason.contains("-5"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn conflicts_and_timeouts_are_retryable() {
        let stale: ShopError =
            DispatchError::<OrderError>::Concurrency("stale version".into()).into();
        assert!(stale.is_retryable());

        let slow: ShopError = EventStoreError::Unavailable("timed out".into()).into();
        assert!(matches!(slow, ShopError::Unavailable(_)));
        assert!(slow.is_retryable());

        let broken: ShopError = EventStoreError::InvalidAppend("gap".into()).into();
        assert!(!broken.is_retryable());
    }

    #[test]
    fn registry_errors_map_onto_the_taxonomy() {
        let dup: ShopError = RegistryError::DuplicateCode {
            code: "MEC-001".into(),
        }
        .into();
        assert_eq!(dup.kind(), "duplicate_code");

        let missing: ShopError = RegistryError::MissingField { field: "name" }.into();
        assert!(matches!(missing, ShopError::InvalidInput { field: "name", .. }));
    }

    #[test]
    fn missing_orders_are_not_found() {
        let id = OrderId::new(AggregateId::new());
        let err: ShopError = OrderError::NotFound(id).into();
        assert_eq!(err, ShopError::not_found("service order", id));
    }
}
