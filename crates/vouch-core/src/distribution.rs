//! Pro-rata distribution of the vouchers-pool share.
//!
//! The pool share of a deposit is redistributed to the subject's other
//! active vouches, weighted by their current balances. Division is integer
//! floor division; the remainder (at most `n - 1` units for `n` recipients)
//! is credited to the last vouch in ascending-id iteration order so that the
//! distributed total equals the pool share exactly.

use crate::amount::{Amount, AmountError};
use crate::VouchId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from pool distribution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributeError {
    /// A non-zero pool share was offered with no eligible recipient.
    /// The split engine waives the pool fee in this situation, so hitting
    /// this means a caller bypassed the first-vouch waiver.
    #[error("no eligible recipients for pool share of {pool_share} units")]
    NoRecipients { pool_share: Amount },
    #[error(transparent)]
    Amount(#[from] AmountError),
}

/// Balance increment owed to one existing vouch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCredit {
    pub vouch: VouchId,
    pub amount: Amount,
}

/// Distribute `pool_share` across `existing` vouches pro-rata by balance.
///
/// `existing` must be the subject's other active vouches ordered by ascending
/// vouch id (the vouch being created or increased is excluded; it cannot pay
/// itself). Returns one credit per input vouch, in the same order; credits
/// sum to `pool_share` exactly.
pub fn distribute_pool(
    pool_share: Amount,
    existing: &[(VouchId, Amount)],
) -> Result<Vec<PoolCredit>, DistributeError> {
    if pool_share.is_zero() {
        return Ok(existing
            .iter()
            .map(|&(vouch, _)| PoolCredit {
                vouch,
                amount: Amount::ZERO,
            })
            .collect());
    }

    let mut total = Amount::ZERO;
    for &(_, balance) in existing {
        total = total.checked_add(balance)?;
    }
    if existing.is_empty() || total.is_zero() {
        return Err(DistributeError::NoRecipients { pool_share });
    }

    let mut credits = Vec::with_capacity(existing.len());
    let mut distributed = Amount::ZERO;
    for &(vouch, balance) in existing {
        let amount = pool_share.mul_div_floor(balance.units(), total.units())?;
        distributed = distributed.checked_add(amount)?;
        credits.push(PoolCredit { vouch, amount });
    }

    // Floor division leaves 0..=n-1 units; the last recipient absorbs them.
    let remainder = pool_share.checked_sub(distributed)?;
    if !remainder.is_zero() {
        let last = credits
            .last_mut()
            .ok_or(DistributeError::NoRecipients { pool_share })?;
        last.amount = last.amount.checked_add(remainder)?;
    }

    Ok(credits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vouches(balances: &[u128]) -> Vec<(VouchId, Amount)> {
        balances
            .iter()
            .enumerate()
            .map(|(i, &b)| (VouchId(i as u64 + 1), Amount(b)))
            .collect()
    }

    fn total(credits: &[PoolCredit]) -> u128 {
        credits.iter().map(|c| c.amount.units()).sum()
    }

    #[test]
    fn sole_voucher_receives_everything() {
        let credits = distribute_pool(Amount(15), &vouches(&[985])).expect("distribute");
        assert_eq!(credits, vec![PoolCredit { vouch: VouchId(1), amount: Amount(15) }]);
    }

    #[test]
    fn distribution_is_weighted_by_balance() {
        let credits = distribute_pool(Amount(100), &vouches(&[300, 100])).expect("distribute");
        assert_eq!(credits[0].amount, Amount(75));
        assert_eq!(credits[1].amount, Amount(25));
    }

    #[test]
    fn remainder_goes_to_last_vouch_in_order() {
        // 100 over three equal balances: floor gives 33 each, 1 unit left.
        let credits = distribute_pool(Amount(100), &vouches(&[50, 50, 50])).expect("distribute");
        assert_eq!(credits[0].amount, Amount(33));
        assert_eq!(credits[1].amount, Amount(33));
        assert_eq!(credits[2].amount, Amount(34));
        assert_eq!(total(&credits), 100);
    }

    #[test]
    fn credits_always_sum_to_pool_share() {
        let sets: &[&[u128]] = &[
            &[1],
            &[1, 1, 1, 1, 1, 1, 1],
            &[999, 1],
            &[123, 456, 789, 1011],
            &[u64::MAX as u128, 1, 7],
        ];
        for balances in sets {
            for pool in [1u128, 2, 99, 100, 10_000, 1_000_003] {
                let credits =
                    distribute_pool(Amount(pool), &vouches(balances)).expect("distribute");
                assert_eq!(total(&credits), pool, "pool={pool} balances={balances:?}");
            }
        }
    }

    #[test]
    fn per_vouch_floor_is_respected_before_remainder() {
        // floor(P * b_i / T) for each vouch; only the last may exceed its floor,
        // and by at most n-1 units.
        let balances = vouches(&[7, 11, 13]);
        let pool = 1000u128;
        let t: u128 = 7 + 11 + 13;
        let credits = distribute_pool(Amount(pool), &balances).expect("distribute");
        for (i, credit) in credits.iter().enumerate() {
            let floor = pool * balances[i].1.units() / t;
            if i + 1 < credits.len() {
                assert_eq!(credit.amount.units(), floor);
            } else {
                assert!(credit.amount.units() >= floor);
                assert!(credit.amount.units() - floor < credits.len() as u128);
            }
        }
    }

    #[test]
    fn zero_pool_share_yields_zero_credits() {
        let credits = distribute_pool(Amount::ZERO, &vouches(&[10, 20])).expect("distribute");
        assert!(credits.iter().all(|c| c.amount.is_zero()));
        assert!(distribute_pool(Amount::ZERO, &[]).expect("empty").is_empty());
    }

    #[test]
    fn nonzero_pool_with_no_recipients_is_an_error() {
        assert!(matches!(
            distribute_pool(Amount(10), &[]),
            Err(DistributeError::NoRecipients { .. })
        ));
        assert!(matches!(
            distribute_pool(Amount(10), &vouches(&[0, 0])),
            Err(DistributeError::NoRecipients { .. })
        ));
    }
}
