//! `autoshop-core`: domain building blocks shared by every shop module.
//!
//! Nothing in here knows about service orders, budgets or mechanics; it only
//! provides the vocabulary (identity, versioning, errors) those modules speak.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::AggregateId;
pub use value_object::ValueObject;
