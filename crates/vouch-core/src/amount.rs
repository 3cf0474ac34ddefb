//! Integer currency amounts.
//!
//! All value in the protocol is accounted in smallest currency units using
//! `u128`. Arithmetic is checked throughout; any wrap is surfaced as an
//! [`AmountError::Overflow`] instead of silently corrupting the ledger.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from amount arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("arithmetic overflow in amount calculation")]
    Overflow,
    #[error("amount underflow: tried to subtract more than the balance")]
    Underflow,
}

/// Non-negative integer amount in smallest currency units.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub const fn new(units: u128) -> Self {
        Self(units)
    }

    pub const fn units(self) -> u128 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Result<Self, AmountError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    pub fn checked_sub(self, other: Self) -> Result<Self, AmountError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(AmountError::Underflow)
    }

    /// `floor(self * numerator / denominator)` with overflow checking.
    ///
    /// This is the primitive behind both the basis-point fee split and the
    /// pro-rata pool distribution.
    pub fn mul_div_floor(self, numerator: u128, denominator: u128) -> Result<Self, AmountError> {
        if denominator == 0 {
            return Err(AmountError::Overflow);
        }
        let product = self
            .0
            .checked_mul(numerator)
            .ok_or(AmountError::Overflow)?;
        Ok(Self(product / denominator))
    }

    /// Big-endian fixed-width bytes for storage values.
    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
