//! Basis-point fee configuration and the deposit split engine.
//!
//! Every incoming deposit is split into four non-negative parts:
//!
//! ```text
//! deposit = entry_fee + donation_share + pool_share + net_stake
//! ```
//!
//! All calculations use integer arithmetic only, with floor rounding on each
//! component and the remainder absorbed into `net_stake`, so the identity
//! above holds exactly and no value is created or destroyed.

use crate::amount::{Amount, AmountError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Denominator for basis-point rates (100% == 10_000 bp).
pub const BASIS_POINTS: u16 = 10_000;

/// Errors from fee configuration and the split calculation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeError {
    #[error("invalid fee configuration: {reason}")]
    InvalidConfiguration { reason: String },
    #[error(transparent)]
    Amount(#[from] AmountError),
}

/// Protocol fee rates in basis points.
///
/// Mutated only through the engine's administrative surface, which validates
/// before persisting; the split engine may assume a valid config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Portion retained by the protocol.
    pub entry_bps: u16,
    /// Portion credited directly to the subject's rewards balance.
    pub donation_bps: u16,
    /// Portion redistributed pro-rata to the subject's other vouchers.
    pub pool_bps: u16,
}

impl FeeConfig {
    pub const fn zero() -> Self {
        Self {
            entry_bps: 0,
            donation_bps: 0,
            pool_bps: 0,
        }
    }

    /// Reject any configuration where a rate exceeds 100% or the combined
    /// rates exceed 100% of a deposit.
    pub fn validate(&self) -> Result<(), FeeError> {
        for (name, bps) in [
            ("entry_bps", self.entry_bps),
            ("donation_bps", self.donation_bps),
            ("pool_bps", self.pool_bps),
        ] {
            if bps > BASIS_POINTS {
                return Err(FeeError::InvalidConfiguration {
                    reason: format!("{name} ({bps}) exceeds {BASIS_POINTS}"),
                });
            }
        }
        let total =
            u32::from(self.entry_bps) + u32::from(self.donation_bps) + u32::from(self.pool_bps);
        if total > u32::from(BASIS_POINTS) {
            return Err(FeeError::InvalidConfiguration {
                reason: format!("combined rates ({total} bp) exceed {BASIS_POINTS}"),
            });
        }
        Ok(())
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self::zero()
    }
}

/// Result of splitting a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub entry_fee: Amount,
    pub donation_share: Amount,
    pub pool_share: Amount,
    pub net_stake: Amount,
}

impl FeeSplit {
    /// Total of all four components; always equals the original deposit.
    pub fn total(&self) -> Result<Amount, AmountError> {
        self.entry_fee
            .checked_add(self.donation_share)?
            .checked_add(self.pool_share)?
            .checked_add(self.net_stake)
    }
}

fn bps_share(amount: Amount, bps: u16) -> Result<Amount, AmountError> {
    amount.mul_div_floor(u128::from(bps), u128::from(BASIS_POINTS))
}

/// Split a deposit according to the fee configuration.
///
/// When the subject has no other active vouchers, the pool share is waived:
/// a pool fee with nobody to distribute it to would be unclaimable value, so
/// it is never collected on a subject's very first vouch.
pub fn split_deposit(
    amount: Amount,
    config: &FeeConfig,
    has_other_active_vouchers: bool,
) -> Result<FeeSplit, FeeError> {
    config.validate()?;

    let entry_fee = bps_share(amount, config.entry_bps)?;
    let donation_share = bps_share(amount, config.donation_bps)?;
    let pool_share = if has_other_active_vouchers {
        bps_share(amount, config.pool_bps)?
    } else {
        Amount::ZERO
    };

    // Each component is a floor of at most its bp fraction and the rates sum
    // to <= 10_000, so the subtractions cannot underflow.
    let net_stake = amount
        .checked_sub(entry_fee)?
        .checked_sub(donation_share)?
        .checked_sub(pool_share)?;

    Ok(FeeSplit {
        entry_fee,
        donation_share,
        pool_share,
        net_stake,
    })
}
