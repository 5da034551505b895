//! Monetary amounts in minor currency units.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// A non-negative monetary amount in the smallest currency unit (e.g. cents).
///
/// Currency conversion is out of scope; the platform runs in a single
/// currency and amounts are flat integers.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(amount: u64) -> Self {
        Self(amount)
    }

    pub fn minor(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition; overflow is a bug-class invariant violation.
    pub fn add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money addition overflow"))
    }

    /// Checked subtraction; going negative is rejected.
    pub fn sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money subtraction below zero"))
    }

    /// Multiply by a quantity (e.g. unit price × line quantity).
    pub fn times(self, qty: u32) -> DomainResult<Money> {
        self.0
            .checked_mul(u64::from(qty))
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money multiplication overflow"))
    }
}

impl ValueObject for Money {}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
