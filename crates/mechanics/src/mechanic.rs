use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use autoshop_core::{DomainError, Entity};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MechanicId(Uuid);

impl MechanicId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MechanicId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for MechanicId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for MechanicId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s)
            .map(Self)
            .map_err(|e| DomainError::invalid_id(format!("MechanicId: {e}")))
    }
}

/// A mechanic as listed in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mechanic {
    pub id: MechanicId,
    pub name: String,
    /// Short badge code, unique across the registry (compared case-insensitively).
    pub code: String,
}

impl Entity for Mechanic {
    type Id = MechanicId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Canonical form used for uniqueness checks.
pub(crate) fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
