#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

//! Vouch lifecycle engine.
//!
//! This crate orchestrates the protocol's top-level operations against the
//! persistent ledger:
//!
//! 1. **Create / increase**: resolve the subject, split the deposit,
//!    credit the donation share, distribute the pool share, persist the
//!    vouch, as one atomic ledger transaction.
//! 2. **Withdraw**: resolve the claimant, zero the balance, pay out through
//!    the [`ValueTransfer`] seam, compensate on failure.
//! 3. **Bind**: react to registration/claim events from the identity
//!    registry and attestation service by merging pending rewards.
//! 4. **Archive**: react to profile archival without forfeiting balances.
//!
//! The execution environment guarantees serial, non-interleaved operations;
//! the engine adds no internal locking beyond the per-operation ledger
//! transaction.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use vouch_core::{
    Address, Amount, AttestationHash, FeeConfig, ProfileId, Resolution, SequencedEvent,
    SubjectDescriptor, SubjectKey, Vouch, VouchId,
};
use vouch_ledger::{vouches::DepositReceipt, AuditTotals, LedgerError, LedgerStorage};

pub mod transfer;

pub use transfer::{MockTransfer, TransferError, ValueTransfer};

/// Default minimum deposit for creating or increasing a vouch.
pub const DEFAULT_MIN_VOUCH_AMOUNT: u128 = 1;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("no profile registered for address {0}")]
    ProfileNotFoundForAddress(Address),

    #[error("no profile claimed attestation {0}")]
    ProfileNotFoundForAttestation(AttestationHash),

    #[error("deposit of {amount} is below the minimum vouch amount {minimum}")]
    BelowMinimumAmount { amount: Amount, minimum: Amount },

    #[error("value transfer of {amount} to {payout} failed: {source}")]
    TransferFailed {
        payout: Address,
        amount: Amount,
        #[source]
        source: TransferError,
    },
}

/// Runtime policy for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginePolicy {
    /// Minimum deposit accepted by create and increase.
    pub min_vouch_amount: Amount,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            min_vouch_amount: Amount(DEFAULT_MIN_VOUCH_AMOUNT),
        }
    }
}

impl EnginePolicy {
    /// Read policy overrides from environment variables.
    pub fn from_env() -> Self {
        let min_vouch_amount = std::env::var("VOUCH_MIN_AMOUNT")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Amount)
            .unwrap_or(Amount(DEFAULT_MIN_VOUCH_AMOUNT));

        Self { min_vouch_amount }
    }
}

/// The vouch lifecycle manager.
pub struct VouchEngine {
    storage: LedgerStorage,
    policy: EnginePolicy,
    transfer: Arc<dyn ValueTransfer>,
}

impl VouchEngine {
    pub fn new(
        storage: LedgerStorage,
        policy: EnginePolicy,
        transfer: Arc<dyn ValueTransfer>,
    ) -> Self {
        Self {
            storage,
            policy,
            transfer,
        }
    }

    /// Open the ledger at `path` and build an engine around it.
    pub fn open_at(
        path: impl AsRef<Path>,
        policy: EnginePolicy,
        transfer: Arc<dyn ValueTransfer>,
    ) -> Result<Self, EngineError> {
        Ok(Self::new(LedgerStorage::open_at(path)?, policy, transfer))
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub fn storage(&self) -> &LedgerStorage {
        &self.storage
    }

    // ========== Administration ==========

    /// Replace the fee configuration.
    ///
    /// Validated here, at configuration time; deposit operations may assume
    /// a valid config and never observe a violating one mid-operation.
    pub fn set_fee_config(&self, config: FeeConfig) -> Result<(), EngineError> {
        config.validate().map_err(LedgerError::Fee)?;
        self.storage.set_fee_config(&config)?;
        Ok(())
    }

    pub fn fee_config(&self) -> Result<FeeConfig, EngineError> {
        Ok(self.storage.fee_config()?)
    }

    // ========== Deposits ==========

    fn check_minimum(&self, amount: Amount) -> Result<(), EngineError> {
        if amount < self.policy.min_vouch_amount {
            return Err(EngineError::BelowMinimumAmount {
                amount,
                minimum: self.policy.min_vouch_amount,
            });
        }
        Ok(())
    }

    /// Create a new vouch from `author` to the subject.
    pub fn create_vouch(
        &self,
        author: ProfileId,
        subject: SubjectDescriptor,
        amount: Amount,
        now_ms: u64,
    ) -> Result<DepositReceipt, EngineError> {
        self.check_minimum(amount)?;
        let config = self.storage.fee_config()?;
        Ok(self
            .storage
            .create_vouch(author, subject, amount, &config, now_ms)?)
    }

    /// Add a deposit to an existing vouch.
    pub fn increase_vouch(
        &self,
        vouch: VouchId,
        subject: SubjectDescriptor,
        amount: Amount,
        now_ms: u64,
    ) -> Result<DepositReceipt, EngineError> {
        self.check_minimum(amount)?;
        let config = self.storage.fee_config()?;
        Ok(self
            .storage
            .increase_vouch(vouch, subject, amount, &config, now_ms)?)
    }

    // ========== Withdrawals ==========

    /// Require the descriptor to resolve to a registered profile.
    fn require_profile(&self, descriptor: SubjectDescriptor) -> Result<ProfileId, EngineError> {
        match self.storage.resolve(descriptor)? {
            Resolution::Resolved(profile) => Ok(profile),
            Resolution::Pending(key) => match key {
                SubjectKey::PendingAddress(a) => Err(EngineError::ProfileNotFoundForAddress(a)),
                SubjectKey::PendingAttestation(h) => {
                    Err(EngineError::ProfileNotFoundForAttestation(h))
                }
                // Profile descriptors always resolve.
                SubjectKey::Profile(profile) => Ok(profile),
            },
        }
    }

    /// Claim the full accrued rewards balance for `claimant` and pay it to
    /// `payout`.
    ///
    /// The balance is zeroed before the external transfer runs, and the
    /// transferred amount is fixed by that first read; a failing transfer
    /// rolls the balance back so the claim can be retried.
    pub fn withdraw_rewards(
        &self,
        claimant: SubjectDescriptor,
        payout: Address,
        now_ms: u64,
    ) -> Result<Amount, EngineError> {
        let profile = self.require_profile(claimant)?;
        let amount = self.storage.withdraw_zero(profile)?;

        match self.transfer.transfer(&payout, amount) {
            Ok(()) => {
                self.storage
                    .finalize_withdraw(profile, payout, amount, now_ms)?;
                Ok(amount)
            }
            Err(source) => {
                self.storage.restore_rewards(profile, amount)?;
                warn!(
                    profile = %profile,
                    payout = %payout,
                    amount = %amount,
                    error = %source,
                    "payout failed, withdrawal rolled back"
                );
                Err(EngineError::TransferFailed {
                    payout,
                    amount,
                    source,
                })
            }
        }
    }

    // ========== Collaborator notifications ==========

    /// An address was registered to a profile: bind it and merge any rewards
    /// accrued while it was pending. Returns the merged amount.
    pub fn bind_address(
        &self,
        address: Address,
        profile: ProfileId,
        now_ms: u64,
    ) -> Result<Amount, EngineError> {
        Ok(self
            .storage
            .bind_and_merge(SubjectKey::PendingAddress(address), profile, now_ms)?)
    }

    /// An attestation was claimed by a profile: bind it and merge any
    /// rewards accrued while it was pending. Returns the merged amount.
    pub fn bind_attestation(
        &self,
        attestation: AttestationHash,
        profile: ProfileId,
        now_ms: u64,
    ) -> Result<Amount, EngineError> {
        Ok(self.storage.bind_and_merge(
            SubjectKey::PendingAttestation(attestation),
            profile,
            now_ms,
        )?)
    }

    /// The subject's profile was archived: archive all of its vouches.
    pub fn archive_profile(
        &self,
        profile: ProfileId,
        now_ms: u64,
    ) -> Result<Vec<VouchId>, EngineError> {
        Ok(self.storage.archive_profile_vouches(profile, now_ms)?)
    }

    // ========== Read surface ==========

    pub fn resolve(&self, descriptor: SubjectDescriptor) -> Result<Resolution, EngineError> {
        Ok(self.storage.resolve(descriptor)?)
    }

    pub fn vouch(&self, id: VouchId) -> Result<Option<Vouch>, EngineError> {
        Ok(self.storage.vouch(id)?)
    }

    /// Active vouches for the subject behind `descriptor`, ascending by id.
    pub fn active_vouches_for(
        &self,
        descriptor: SubjectDescriptor,
    ) -> Result<Vec<Vouch>, EngineError> {
        let resolution = self.storage.resolve(descriptor)?;
        Ok(self.storage.active_vouches_for(resolution)?)
    }

    /// Rewards balance under the descriptor's canonical key.
    pub fn rewards_balance(&self, descriptor: SubjectDescriptor) -> Result<Amount, EngineError> {
        let resolution = self.storage.resolve(descriptor)?;
        Ok(self.storage.rewards_balance(resolution.key())?)
    }

    pub fn audit_totals(&self) -> Result<AuditTotals, EngineError> {
        Ok(self.storage.audit_totals()?)
    }

    pub fn events_since(&self, seq: u64) -> Result<Vec<SequencedEvent>, EngineError> {
        Ok(self.storage.events_since(seq)?)
    }
}
