use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use autoshop_core::ValueObject;

/// Non-negative amount in minor currency units (cents).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyParseError {
    #[error("amount must not be negative")]
    Negative,
    #[error("malformed amount '{0}'")]
    Malformed(String),
}

impl FromStr for Money {
    type Err = MoneyParseError;

    /// Parses `"150"`, `"150.5"` and `"150.00"`; at most two decimals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('-') {
            return Err(MoneyParseError::Negative);
        }
        let malformed = || MoneyParseError::Malformed(s.to_string());

        let (whole, frac) = match s.split_once('.') {
            Some((_, "")) => return Err(malformed()),
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }

        let whole: u64 = whole.parse().map_err(|_| malformed())?;
        let frac_cents: u64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().map_err(|_| malformed())? * 10,
            _ => frac.parse().map_err(|_| malformed())?,
        };

        whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .map(Money)
            .ok_or_else(malformed)
    }
}

/// Tax rate in basis points (1800 = 18%).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl ValueObject for TaxRate {}

impl TaxRate {
    pub const ZERO: TaxRate = TaxRate(0);

    pub const fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    pub const fn bps(self) -> u32 {
        self.0
    }

    /// Tax owed on `amount`, rounded half-up to the cent.
    pub fn tax_on(self, amount: Money) -> Money {
        let cents = (amount.cents() as u128 * self.0 as u128 + 5_000) / 10_000;
        Money(u64::try_from(cents).unwrap_or(u64::MAX))
    }
}

impl core::fmt::Display for TaxRate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_strings() {
        assert_eq!("150.00".parse::<Money>().unwrap(), Money::from_cents(15_000));
        assert_eq!("150.5".parse::<Money>().unwrap(), Money::from_cents(15_050));
        assert_eq!("50".parse::<Money>().unwrap(), Money::from_cents(5_000));
        assert_eq!(" 0.07 ".parse::<Money>().unwrap(), Money::from_cents(7));
    }

    #[test]
    fn rejects_negative_and_malformed_amounts() {
        assert_eq!("-1.00".parse::<Money>(), Err(MoneyParseError::Negative));
        assert!(matches!("1.234".parse::<Money>(), Err(MoneyParseError::Malformed(_))));
        assert!(matches!("abc".parse::<Money>(), Err(MoneyParseError::Malformed(_))));
        assert!(matches!(".50".parse::<Money>(), Err(MoneyParseError::Malformed(_))));
    }

    #[test]
    fn a_trailing_point_needs_digits_after_it() {
        assert!(matches!("150.".parse::<Money>(), Err(MoneyParseError::Malformed(_))));
        assert!(matches!("0.".parse::<Money>(), Err(MoneyParseError::Malformed(_))));
        assert!(matches!("1..5".parse::<Money>(), Err(MoneyParseError::Malformed(_))));
    }

    #[test]
    fn displays_with_two_decimals() {
        assert_eq!(Money::from_cents(20_000).to_string(), "200.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn tax_rounds_half_up() {
        let rate = TaxRate::from_bps(1800);
        assert_eq!(rate.tax_on(Money::from_cents(20_000)), Money::from_cents(3_600));
        // 0.18 * 0.25 = 0.045 -> 0.05
        assert_eq!(rate.tax_on(Money::from_cents(25)), Money::from_cents(5));
        assert_eq!(TaxRate::ZERO.tax_on(Money::from_cents(999)), Money::ZERO);
        assert_eq!(rate.to_string(), "18.00%");
    }
}
