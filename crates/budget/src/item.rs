use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use autoshop_core::ValueObject;

use crate::money::Money;

/// What a budget line charges for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Part,
    Labor,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Part => "part",
            ItemKind::Labor => "labor",
        }
    }
}

impl FromStr for ItemKind {
    type Err = ItemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "part" => Ok(ItemKind::Part),
            "labor" | "labour" => Ok(ItemKind::Labor),
            other => Err(ItemError::UnknownKind(other.to_string())),
        }
    }
}

/// One line of a budget. Owned by its order; no identity beyond `line_no`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetItem {
    pub line_no: u32,
    pub description: String,
    pub kind: ItemKind,
    pub price: Money,
}

impl ValueObject for BudgetItem {}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ItemError {
    #[error("item description must not be empty")]
    EmptyDescription,

    #[error("item price must not be negative (got {0} cents)")]
    NegativePrice(i64),

    #[error("unknown item type '{0}' (expected part or labor)")]
    UnknownKind(String),

    #[error("item price would overflow the order total")]
    TotalOverflow,
}

impl ItemError {
    /// The input field a station should highlight.
    pub fn field(&self) -> &'static str {
        match self {
            ItemError::EmptyDescription => "description",
            ItemError::UnknownKind(_) => "type",
            ItemError::NegativePrice(_) | ItemError::TotalOverflow => "price",
        }
    }
}

impl BudgetItem {
    /// Validate raw station input into a line.
    pub fn new(
        line_no: u32,
        description: &str,
        kind: ItemKind,
        price_cents: i64,
    ) -> Result<Self, ItemError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ItemError::EmptyDescription);
        }
        let cents = u64::try_from(price_cents).map_err(|_| ItemError::NegativePrice(price_cents))?;

        Ok(Self {
            line_no,
            description: description.to_string(),
            kind,
            price: Money::from_cents(cents),
        })
    }
}
