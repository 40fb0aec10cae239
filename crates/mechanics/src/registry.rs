use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use thiserror::Error;
use tracing::info;

use crate::mechanic::{Mechanic, MechanicId, normalize_code};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("mechanic code '{code}' is already registered")]
    DuplicateCode { code: String },

    #[error("mechanic {field} must not be empty")]
    MissingField { field: &'static str },

    #[error("mechanic registry unavailable: {0}")]
    Unavailable(String),
}

/// Append/list directory of mechanics. There is no update or delete.
pub trait MechanicRegistry: Send + Sync {
    fn add(&self, name: &str, code: &str) -> Result<MechanicId, RegistryError>;

    fn get(&self, id: MechanicId) -> Option<Mechanic>;

    /// All mechanics in registration order.
    fn list(&self) -> Vec<Mechanic>;

    fn contains(&self, id: MechanicId) -> bool {
        self.get(id).is_some()
    }
}

impl<R> MechanicRegistry for Arc<R>
where
    R: MechanicRegistry + ?Sized,
{
    fn add(&self, name: &str, code: &str) -> Result<MechanicId, RegistryError> {
        (**self).add(name, code)
    }

    fn get(&self, id: MechanicId) -> Option<Mechanic> {
        (**self).get(id)
    }

    fn list(&self) -> Vec<Mechanic> {
        (**self).list()
    }

    fn contains(&self, id: MechanicId) -> bool {
        (**self).contains(id)
    }
}

#[derive(Debug, Default)]
struct Directory {
    mechanics: Vec<Mechanic>,
    by_id: HashMap<MechanicId, usize>,
    by_code: HashMap<String, MechanicId>,
}

#[derive(Debug, Default)]
pub struct InMemoryMechanicRegistry {
    inner: RwLock<Directory>,
}

impl InMemoryMechanicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().mechanics.len()
    }

    /// Reads go through a poisoned lock; no directory update stops halfway.
    fn read(&self) -> RwLockReadGuard<'_, Directory> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MechanicRegistry for InMemoryMechanicRegistry {
    fn add(&self, name: &str, code: &str) -> Result<MechanicId, RegistryError> {
        let name = name.trim();
        let code = code.trim();
        if name.is_empty() {
            return Err(RegistryError::MissingField { field: "name" });
        }
        if code.is_empty() {
            return Err(RegistryError::MissingField { field: "code" });
        }

        let key = normalize_code(code);
        let mut dir = self
            .inner
            .write()
            .map_err(|_| RegistryError::Unavailable("lock poisoned".to_string()))?;

        if dir.by_code.contains_key(&key) {
            return Err(RegistryError::DuplicateCode {
                code: code.to_string(),
            });
        }

        let id = MechanicId::new();
        let idx = dir.mechanics.len();
        dir.mechanics.push(Mechanic {
            id,
            name: name.to_string(),
            code: code.to_string(),
        });
        dir.by_id.insert(id, idx);
        dir.by_code.insert(key, id);

        info!(mechanic_id = %id, code, "mechanic registered");
        Ok(id)
    }

    fn get(&self, id: MechanicId) -> Option<Mechanic> {
        let dir = self.read();
        dir.by_id.get(&id).map(|&idx| dir.mechanics[idx].clone())
    }

    fn list(&self) -> Vec<Mechanic> {
        self.read().mechanics.clone()
    }
}

/// Starter roster registered when a shop opens with an empty directory.
const DEFAULT_ROSTER: [(&str, &str); 3] = [
    ("Juan Mecánico", "MEC-001"),
    ("Pedro Técnico", "MEC-002"),
    ("Carlos Electricista", "MEC-003"),
];

/// Register the starter roster if the registry is empty. Returns how many were added.
pub fn seed_defaults<R: MechanicRegistry + ?Sized>(registry: &R) -> Result<usize, RegistryError> {
    if !registry.list().is_empty() {
        return Ok(0);
    }
    for (name, code) in DEFAULT_ROSTER {
        registry.add(name, code)?;
    }
    Ok(DEFAULT_ROSTER.len())
}
