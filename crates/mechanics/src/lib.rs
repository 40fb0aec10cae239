//! Mechanic registry.
//!
//! Append-only directory of the shop's mechanics. Orders keep only a
//! `MechanicId` and look the mechanic up here whenever they are displayed, so a
//! name shown on a budget or receipt is always the registry's current one.

pub mod mechanic;
pub mod registry;

pub use mechanic::{Mechanic, MechanicId};
pub use registry::{InMemoryMechanicRegistry, MechanicRegistry, RegistryError, seed_defaults};
