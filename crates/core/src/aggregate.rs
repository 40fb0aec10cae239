//! Aggregate traits and optimistic version expectations.

use crate::error::{DomainError, DomainResult};

/// An aggregate root: a consistency boundary with identity and a version.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far. A fresh, never-created aggregate is at 0.
    fn version(&self) -> u64;
}

/// What a writer believes the current version of an aggregate to be.
///
/// Stations that render a snapshot and later submit a change pass
/// `Exact(snapshot.version())`; if anything was committed in between, the write
/// is refused instead of silently clobbering the newer state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Accept whatever is current (the write is re-decided against fresh state).
    Any,
    /// Require the aggregate to still be at this version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stale version (expected: {self}, actual: {actual})"
            )))
        }
    }
}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExpectedVersion::Any => f.write_str("any"),
            ExpectedVersion::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// Decide/evolve split for event-sourced aggregates.
///
/// `handle` inspects the current state and returns the events a command
/// produces, or rejects it. `apply` is the only way state changes. Neither may
/// perform IO, so replaying the same events always yields the same state.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve state from one event; implementations bump `version()` by one.
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events a command produces. Must not mutate `self`.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}
