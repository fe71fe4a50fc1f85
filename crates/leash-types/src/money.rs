//! Monetary amounts
//!
//! All internal arithmetic runs on [`Amount`], a single-currency value in
//! minor units (cents). The issuance wire format accepts decimal major units
//! via [`rust_decimal::Decimal`]; conversion is exact or rejected.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LeashError, Result};

/// A monetary amount in minor units (cents)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Amount(pub u64);

impl Amount {
    pub fn zero() -> Self {
        Self(0)
    }

    pub fn new(cents: u64) -> Self {
        Self(cents)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Convert a decimal major-unit value (e.g. `300` or `249.99`) to cents.
    ///
    /// Rejects negative values and anything with sub-cent precision; the wire
    /// boundary never rounds money.
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() {
            return Err(LeashError::InvalidAmount {
                reason: format!("amount must not be negative, got {}", value),
            });
        }
        let cents = value
            .checked_mul(Decimal::new(100, 0))
            .ok_or(LeashError::AmountOverflow)?;
        if cents.fract() != Decimal::ZERO {
            return Err(LeashError::InvalidAmount {
                reason: format!("amount {} has sub-cent precision", value),
            });
        }
        let cents = cents.to_u64().ok_or(LeashError::AmountOverflow)?;
        Ok(Self(cents))
    }

    /// Convert back to decimal major units for wire responses.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from_i128_with_scale(self.0 as i128, 2)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display as dollars with 2 decimal places
        write!(f, "${:.2}", self.0 as f64 / 100.0)
    }
}
