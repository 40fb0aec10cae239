use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::{BudgetItem, ItemError, ItemKind};
use crate::money::Money;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BudgetError {
    #[error("budget is frozen")]
    Frozen,
    #[error(transparent)]
    Item(#[from] ItemError),
}

/// Append-only list of lines with a derived total.
///
/// Invariant: `total == Σ items[i].price`. The total is recomputed from the
/// lines on every append and never set directly. Once frozen, no line can be
/// added and the total can no longer change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    items: Vec<BudgetItem>,
    total: Money,
    frozen: bool,
}

impl Budget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[BudgetItem] {
        &self.items
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn next_line_no(&self) -> u32 {
        self.items.len() as u32 + 1
    }

    /// Validate a prospective line without changing the budget.
    pub fn prepare(
        &self,
        description: &str,
        kind: ItemKind,
        price_cents: i64,
    ) -> Result<BudgetItem, BudgetError> {
        if self.frozen {
            return Err(BudgetError::Frozen);
        }
        let item = BudgetItem::new(self.next_line_no(), description, kind, price_cents)?;
        if self.total.checked_add(item.price).is_none() {
            return Err(ItemError::TotalOverflow.into());
        }
        Ok(item)
    }

    /// Append a line that `prepare` accepted and recompute the total.
    pub fn append(&mut self, item: BudgetItem) {
        self.items.push(item);
        self.total = Self::sum(&self.items);
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    fn sum(items: &[BudgetItem]) -> Money {
        let cents = items
            .iter()
            .fold(0u64, |acc, i| acc.saturating_add(i.price.cents()));
        Money::from_cents(cents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn total_follows_appended_lines() {
        let mut budget = Budget::new();
        let part = budget.prepare("Brake pads", ItemKind::Part, 15_000).unwrap();
        budget.append(part);
        let labor = budget.prepare("Fit pads", ItemKind::Labor, 5_000).unwrap();
        budget.append(labor);

        assert_eq!(budget.total(), Money::from_cents(20_000));
        assert_eq!(budget.items()[1].line_no, 2);
    }

    #[test]
    fn frozen_budget_rejects_new_lines() {
        let mut budget = Budget::new();
        budget.freeze();
        assert_eq!(
            budget.prepare("Late addition", ItemKind::Part, 100),
            Err(BudgetError::Frozen)
        );
    }

    #[test]
    fn overflowing_total_is_rejected() {
        let mut budget = Budget::new();
        let big = budget.prepare("Engine", ItemKind::Part, i64::MAX).unwrap();
        budget.append(big);
        let big2 = budget.prepare("Another engine", ItemKind::Part, i64::MAX).unwrap();
        budget.append(big2);
        let err = budget.prepare("Bolt", ItemKind::Part, i64::MAX).unwrap_err();
        assert_eq!(err, BudgetError::Item(ItemError::TotalOverflow));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// The total equals the sum of line prices after every append, and
        /// invalid lines leave the budget untouched.
        #[test]
        fn total_is_sum_of_prices(prices in prop::collection::vec(-1_000i64..1_000_000i64, 0..20)) {
            let mut budget = Budget::new();
            for price in prices {
                let before = budget.clone();
                match budget.prepare("line", ItemKind::Labor, price) {
                    Ok(item) => budget.append(item),
                    Err(_) => prop_assert_eq!(&budget, &before),
                }
                let expected: u64 = budget.items().iter().map(|i| i.price.cents()).sum();
                prop_assert_eq!(budget.total().cents(), expected);
            }
        }
    }
}
