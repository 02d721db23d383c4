//! Monetary amounts in the smallest currency unit (e.g. centavos).
//!
//! Order totals are snapshots that must never drift from the sum of their
//! item prices, so all arithmetic is checked: an overflowing sum is a
//! validation error, never a silent wrap.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Amount in minor units. Compared by value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor_units(units: u64) -> Self {
        Self(units)
    }

    pub fn minor_units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Sum an iterator of amounts, failing on overflow.
    pub fn checked_sum<I>(amounts: I) -> Result<Money, DomainError>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, a| acc.checked_add(a))
            .ok_or_else(|| DomainError::validation("order total overflows"))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn checked_sum_adds_amounts() {
        let total = Money::checked_sum([
            Money::from_minor_units(19900),
            Money::from_minor_units(4990),
        ])
        .unwrap();
        assert_eq!(total, Money::from_minor_units(24890));
    }

    #[test]
    fn checked_sum_rejects_overflow() {
        let err = Money::checked_sum([
            Money::from_minor_units(u64::MAX),
            Money::from_minor_units(1),
        ])
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    proptest! {
        /// Property: summing never under- or over-counts relative to u128 math.
        #[test]
        fn sum_matches_wide_arithmetic(units in prop::collection::vec(0u64..1_000_000_000u64, 0..20)) {
            let wide: u128 = units.iter().map(|u| *u as u128).sum();
            let summed = Money::checked_sum(units.iter().map(|u| Money::from_minor_units(*u))).unwrap();
            prop_assert_eq!(summed.minor_units() as u128, wide);
        }
    }
}
