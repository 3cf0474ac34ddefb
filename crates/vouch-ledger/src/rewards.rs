//! Rewards ledger operations.
//!
//! Rewards entries accumulate donation shares under a [`SubjectKey`], which
//! may be a registered profile or a pending address/attestation key. When a
//! binding event fires, the pending balance is merged into the profile key in
//! the same atomic unit that records the binding, so no deposit can be lost
//! between binding and merge.
//!
//! Withdrawal is split into three primitives so the engine can order them
//! around the external value transfer:
//! 1. [`LedgerStorage::withdraw_zero`]: read-and-zero, one atomic unit
//! 2. the transfer itself (outside this crate)
//! 3. [`LedgerStorage::finalize_withdraw`] on success, or
//!    [`LedgerStorage::restore_rewards`] as the compensating rollback

use crate::txn::{
    abort, finish, tx_add_amount, tx_err, tx_get_amount, tx_get_record, tx_put_amount,
    tx_put_record, EventCtx,
};
use crate::{keys, LedgerError, LedgerStorage};
use sled::Transactional;
use tracing::{debug, info};
use vouch_core::{Address, Amount, LedgerEvent, ProfileId, SubjectKey};

impl LedgerStorage {
    /// Credit `amount` to the entry for `subject` (pending or resolved).
    ///
    /// Counts toward `total_deposited` and emits a `RewardsDeposited` event.
    pub fn deposit_rewards(
        &self,
        subject: SubjectKey,
        amount: Amount,
        now_ms: u64,
    ) -> Result<(), LedgerError> {
        let result = (self.tree(), self.events_tree()).transaction(|(ledger, events)| {
            let mut ctx = EventCtx::load(events)?;
            tx_add_amount(ledger, &keys::rewards(subject), amount)?;
            tx_add_amount(ledger, keys::TOTAL_DEPOSITED, amount)?;
            ctx.append(
                events,
                now_ms,
                LedgerEvent::RewardsDeposited { subject, amount },
            )?;
            ctx.store(events)?;
            Ok(())
        });
        finish(result)?;

        debug!(subject = %subject, amount = %amount, "rewards deposited");
        Ok(())
    }

    /// Bind a pending key to a profile and merge its accrued balance.
    ///
    /// Invoked by the identity registry / attestation service when an address
    /// is registered or an attestation is claimed. Idempotent: a repeat call
    /// with the same profile is a no-op (the pending balance is already
    /// zero). Rebinding to a different profile is rejected: bindings are
    /// monotonic and permanent.
    ///
    /// Returns the merged amount.
    pub fn bind_and_merge(
        &self,
        pending: SubjectKey,
        profile: ProfileId,
        now_ms: u64,
    ) -> Result<Amount, LedgerError> {
        if !pending.is_pending() {
            return Err(LedgerError::NotAPendingKey(pending));
        }

        let result = (self.tree(), self.events_tree()).transaction(|(ledger, events)| {
            let binding_key = keys::binding(pending);
            if let Some(v) = ledger.get(binding_key.as_slice())? {
                let existing = ProfileId(crate::decode_u64_be(&v).map_err(tx_err)?);
                if existing == profile {
                    return Ok(Amount::ZERO);
                }
                return abort(LedgerError::BindingConflict {
                    pending,
                    existing,
                    requested: profile,
                });
            }

            ledger.insert(binding_key, profile.0.to_be_bytes().to_vec())?;

            // Reverse index: profile -> bound pending keys.
            let bound_key = keys::bound_keys(profile);
            let mut bound: Vec<SubjectKey> =
                tx_get_record(ledger, &bound_key)?.unwrap_or_default();
            bound.push(pending);
            tx_put_record(ledger, &bound_key, &bound)?;

            let pending_balance = tx_get_amount(ledger, &keys::rewards(pending))?;
            if pending_balance.is_zero() {
                return Ok(Amount::ZERO);
            }

            tx_put_amount(ledger, &keys::rewards(pending), Amount::ZERO)?;
            tx_add_amount(
                ledger,
                &keys::rewards(SubjectKey::Profile(profile)),
                pending_balance,
            )?;

            let mut ctx = EventCtx::load(events)?;
            ctx.append(
                events,
                now_ms,
                LedgerEvent::RewardsMerged {
                    pending,
                    profile,
                    amount: pending_balance,
                },
            )?;
            ctx.store(events)?;

            Ok(pending_balance)
        });
        let merged = finish(result)?;

        info!(
            pending = %pending,
            profile = %profile,
            merged = %merged,
            "pending key bound to profile"
        );
        Ok(merged)
    }

    /// Read the profile's withdrawable balance and zero it, atomically.
    ///
    /// Fails with [`LedgerError::InsufficientRewardsBalance`] when nothing is
    /// owed. The caller must follow up with either
    /// [`Self::finalize_withdraw`] (transfer succeeded) or
    /// [`Self::restore_rewards`] (transfer failed).
    pub fn withdraw_zero(&self, profile: ProfileId) -> Result<Amount, LedgerError> {
        let result = self.tree().transaction(|ledger| {
            let key = keys::rewards(SubjectKey::Profile(profile));
            let balance = tx_get_amount(ledger, &key)?;
            if balance.is_zero() {
                return abort(LedgerError::InsufficientRewardsBalance { profile });
            }
            // Entry stays in the map at zero; it is never removed.
            tx_put_amount(ledger, &key, Amount::ZERO)?;
            Ok(balance)
        });
        finish(result)
    }

    /// Record a completed withdrawal: bump `total_withdrawn` and emit the
    /// withdrawal event. Call only after the value transfer succeeded.
    pub fn finalize_withdraw(
        &self,
        profile: ProfileId,
        payout: Address,
        amount: Amount,
        now_ms: u64,
    ) -> Result<(), LedgerError> {
        let result = (self.tree(), self.events_tree()).transaction(|(ledger, events)| {
            let mut ctx = EventCtx::load(events)?;
            tx_add_amount(ledger, keys::TOTAL_WITHDRAWN, amount)?;
            ctx.append(
                events,
                now_ms,
                LedgerEvent::RewardsWithdrawn {
                    profile,
                    payout,
                    amount,
                },
            )?;
            ctx.store(events)?;
            Ok(())
        });
        finish(result)?;

        info!(profile = %profile, payout = %payout, amount = %amount, "rewards withdrawn");
        Ok(())
    }

    /// Compensating rollback for a failed payout: restore the balance that
    /// [`Self::withdraw_zero`] removed, leaving it claimable for retry.
    pub fn restore_rewards(&self, profile: ProfileId, amount: Amount) -> Result<(), LedgerError> {
        let result = self.tree().transaction(|ledger| {
            tx_add_amount(
                ledger,
                &keys::rewards(SubjectKey::Profile(profile)),
                amount,
            )?;
            Ok(())
        });
        finish(result)?;

        debug!(profile = %profile, amount = %amount, "rewards restored after failed payout");
        Ok(())
    }
}
