#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

//! Persistent vouch and rewards ledger state.
//!
//! This crate owns all durable state of the vouch protocol:
//! - Vouch records and their subject/author indexes
//! - Rewards entries keyed by [`SubjectKey`] (pending or resolved)
//! - Identity bindings (pending key -> profile) and their reverse index
//! - Audit counters for the conservation invariant
//! - An append-only event log
//!
//! Every mutating operation runs as a single sled transaction over the
//! `ledger` and `events` trees. A failing branch aborts the transaction and
//! rolls back all partial writes, including partially applied pool
//! distributions.

use std::path::Path;

use sled::Tree;
use thiserror::Error;
use tracing::info;
use vouch_core::{
    canonical_decode, Amount, AmountError, CanonicalError, ProfileId, Resolution, SequencedEvent,
    SubjectDescriptor, SubjectKey, Vouch, VouchId,
};

pub mod rewards;
mod txn;
pub mod vouches;

pub use vouches::DepositReceipt;

pub const SCHEMA_VERSION: &str = "1";

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),
    #[error("canonical encoding error: {0}")]
    Canonical(#[from] CanonicalError),
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error("schema mismatch: expected {expected}, found {found:?}")]
    SchemaMismatch {
        expected: String,
        found: Option<String>,
    },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{author} already holds an active vouch for {subject}")]
    DuplicateVouch {
        author: ProfileId,
        subject: SubjectKey,
    },
    #[error("no rewards balance available for {profile}")]
    InsufficientRewardsBalance { profile: ProfileId },
    #[error("vouch not found: {0}")]
    VouchNotFound(VouchId),
    #[error("vouch is archived: {0}")]
    VouchArchived(VouchId),
    #[error("descriptor resolves to {resolved}, but {vouch} was created for {recorded}")]
    SubjectMismatch {
        vouch: VouchId,
        recorded: SubjectKey,
        resolved: SubjectKey,
    },
    #[error("{pending} is already bound to {existing}, cannot rebind to {requested}")]
    BindingConflict {
        pending: SubjectKey,
        existing: ProfileId,
        requested: ProfileId,
    },
    #[error("cannot bind {0}: not a pending key")]
    NotAPendingKey(SubjectKey),
    #[error("pool distribution error: {0}")]
    Distribution(#[from] vouch_core::DistributeError),
    #[error("fee error: {0}")]
    Fee(#[from] vouch_core::FeeError),
}

/// Key layout for the `ledger` and `events` trees.
///
/// Subject-key material is self-delimiting (one tag byte determines the
/// payload length), so composite keys need no separators.
pub mod keys {
    use vouch_core::{ProfileId, SubjectKey, VouchId};

    pub const STATE_VERSION: &[u8] = b"meta/state_version";
    pub const NEXT_VOUCH_ID: &[u8] = b"meta/next_vouch_id";
    pub const FEE_CONFIG: &[u8] = b"meta/fee_config";
    pub const TOTAL_DEPOSITED: &[u8] = b"meta/total_deposited";
    pub const TOTAL_WITHDRAWN: &[u8] = b"meta/total_withdrawn";
    pub const TOTAL_ENTRY_FEES: &[u8] = b"meta/total_entry_fees";

    pub const NEXT_EVENT_SEQ: &[u8] = b"meta/next_seq";

    pub const VOUCH_PREFIX: &[u8] = b"vouch/";
    pub const REWARDS_PREFIX: &[u8] = b"rewards/";
    pub const EVENT_PREFIX: &[u8] = b"event/";

    pub fn vouch(id: VouchId) -> Vec<u8> {
        [VOUCH_PREFIX, id.to_be_bytes().as_slice()].concat()
    }

    /// Per-subject list of every vouch id ever created for that exact key.
    pub fn subject_list(subject: SubjectKey) -> Vec<u8> {
        [b"subject/".as_slice(), subject.encode().as_slice()].concat()
    }

    /// Latest vouch id by `(author, subject)` pair, for duplicate checks.
    pub fn author_subject(author: ProfileId, subject: SubjectKey) -> Vec<u8> {
        [
            b"author/".as_slice(),
            author.0.to_be_bytes().as_slice(),
            subject.encode().as_slice(),
        ]
        .concat()
    }

    pub fn rewards(subject: SubjectKey) -> Vec<u8> {
        [REWARDS_PREFIX, subject.encode().as_slice()].concat()
    }

    /// Binding from a pending key to its profile.
    pub fn binding(pending: SubjectKey) -> Vec<u8> {
        [b"binding/".as_slice(), pending.encode().as_slice()].concat()
    }

    /// Reverse index: list of pending keys bound to a profile.
    pub fn bound_keys(profile: ProfileId) -> Vec<u8> {
        [b"bound/".as_slice(), profile.0.to_be_bytes().as_slice()].concat()
    }

    pub fn event(seq: u64) -> Vec<u8> {
        [EVENT_PREFIX, seq.to_be_bytes().as_slice()].concat()
    }
}

pub(crate) fn decode_u128_be(bytes: &[u8]) -> Result<u128, LedgerError> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| LedgerError::Decode(format!("expected 16-byte amount, got {}", bytes.len())))?;
    Ok(u128::from_be_bytes(raw))
}

pub(crate) fn decode_u64_be(bytes: &[u8]) -> Result<u64, LedgerError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LedgerError::Decode(format!("expected 8-byte counter, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

/// Live totals for the conservation audit.
///
/// Invariant, exact at every operation boundary:
/// `vouch_balances + rewards_balances + total_entry_fees
///     == total_deposited - total_withdrawn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditTotals {
    pub total_deposited: Amount,
    pub total_withdrawn: Amount,
    pub total_entry_fees: Amount,
    pub vouch_balances: Amount,
    pub rewards_balances: Amount,
}

impl AuditTotals {
    pub fn conserves(&self) -> bool {
        let held = self
            .vouch_balances
            .checked_add(self.rewards_balances)
            .and_then(|v| v.checked_add(self.total_entry_fees));
        let net = self.total_deposited.checked_sub(self.total_withdrawn);
        matches!((held, net), (Ok(h), Ok(n)) if h == n)
    }
}

/// Handle to the persistent ledger state.
#[derive(Debug, Clone)]
pub struct LedgerStorage {
    ledger: Tree,
    events: Tree,
}

impl LedgerStorage {
    /// Open the ledger trees and verify the schema version.
    pub fn open(db: &sled::Db) -> Result<Self, LedgerError> {
        let ledger = db.open_tree("vouch_ledger")?;
        let events = db.open_tree("vouch_events")?;

        match ledger.get(keys::STATE_VERSION)? {
            None => {
                ledger.insert(keys::STATE_VERSION, SCHEMA_VERSION.as_bytes())?;
                info!(schema = SCHEMA_VERSION, "initialised ledger schema");
            }
            Some(v) if v.as_ref() == SCHEMA_VERSION.as_bytes() => {}
            Some(v) => {
                return Err(LedgerError::SchemaMismatch {
                    expected: SCHEMA_VERSION.to_string(),
                    found: String::from_utf8(v.to_vec()).ok(),
                });
            }
        }

        Ok(Self { ledger, events })
    }

    /// Open a ledger at a filesystem path (convenience for binaries/tests).
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let db = sled::open(path)?;
        Self::open(&db)
    }

    /// Force a sync of pending writes to disk.
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.ledger.flush()?;
        self.events.flush()?;
        Ok(())
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.ledger
    }

    pub(crate) fn events_tree(&self) -> &Tree {
        &self.events
    }

    // ========== Identity resolution ==========

    /// Resolve a descriptor to its canonical ledger key.
    ///
    /// Never fails for a well-formed descriptor: an address or attestation
    /// with no binding (and no history at all) resolves to its pending key.
    /// Existence checks are the lifecycle manager's concern.
    pub fn resolve(&self, descriptor: SubjectDescriptor) -> Result<Resolution, LedgerError> {
        let key = descriptor.unresolved_key();
        if let SubjectKey::Profile(id) = key {
            return Ok(Resolution::Resolved(id));
        }
        match self.ledger.get(keys::binding(key))? {
            Some(v) => Ok(Resolution::Resolved(ProfileId(decode_u64_be(&v)?))),
            None => Ok(Resolution::Pending(key)),
        }
    }

    /// The profile a pending key is bound to, if any.
    pub fn binding(&self, pending: SubjectKey) -> Result<Option<ProfileId>, LedgerError> {
        match self.ledger.get(keys::binding(pending))? {
            Some(v) => Ok(Some(ProfileId(decode_u64_be(&v)?))),
            None => Ok(None),
        }
    }

    /// Pending keys bound to a profile (reverse of [`Self::binding`]).
    pub fn bound_keys(&self, profile: ProfileId) -> Result<Vec<SubjectKey>, LedgerError> {
        match self.ledger.get(keys::bound_keys(profile))? {
            Some(v) => Ok(canonical_decode(&v)?),
            None => Ok(Vec::new()),
        }
    }

    // ========== Read surface ==========

    pub fn vouch(&self, id: VouchId) -> Result<Option<Vouch>, LedgerError> {
        match self.ledger.get(keys::vouch(id))? {
            Some(v) => Ok(Some(canonical_decode(&v)?)),
            None => Ok(None),
        }
    }

    /// All vouch ids ever created for this exact subject key, ascending.
    pub fn subject_vouch_ids(&self, subject: SubjectKey) -> Result<Vec<VouchId>, LedgerError> {
        match self.ledger.get(keys::subject_list(subject))? {
            Some(v) => Ok(canonical_decode(&v)?),
            None => Ok(Vec::new()),
        }
    }

    /// Active vouches for a resolved or pending subject, ascending by id.
    ///
    /// For a resolved profile this is the union of the profile key and every
    /// pending key bound to it: vouchers who staked before the subject
    /// registered stay in the distribution set afterwards.
    pub fn active_vouches_for(&self, resolution: Resolution) -> Result<Vec<Vouch>, LedgerError> {
        let mut subject_keys = vec![resolution.key()];
        if let Resolution::Resolved(profile) = resolution {
            subject_keys.extend(self.bound_keys(profile)?);
        }

        let mut out = Vec::new();
        for subject in subject_keys {
            for id in self.subject_vouch_ids(subject)? {
                let vouch = self
                    .vouch(id)?
                    .ok_or(LedgerError::VouchNotFound(id))?;
                if vouch.is_active() {
                    out.push(vouch);
                }
            }
        }
        out.sort_by_key(|v| v.id);
        Ok(out)
    }

    /// The author's current vouch for this exact canonical key, if active.
    pub fn active_vouch_by_author(
        &self,
        author: ProfileId,
        subject: SubjectKey,
    ) -> Result<Option<Vouch>, LedgerError> {
        let Some(v) = self.ledger.get(keys::author_subject(author, subject))? else {
            return Ok(None);
        };
        let id = VouchId(decode_u64_be(&v)?);
        let vouch = self.vouch(id)?.ok_or(LedgerError::VouchNotFound(id))?;
        Ok(vouch.is_active().then_some(vouch))
    }

    pub fn rewards_balance(&self, subject: SubjectKey) -> Result<Amount, LedgerError> {
        match self.ledger.get(keys::rewards(subject))? {
            Some(v) => Ok(Amount(decode_u128_be(&v)?)),
            None => Ok(Amount::ZERO),
        }
    }

    fn meta_amount(&self, key: &[u8]) -> Result<Amount, LedgerError> {
        match self.ledger.get(key)? {
            Some(v) => Ok(Amount(decode_u128_be(&v)?)),
            None => Ok(Amount::ZERO),
        }
    }

    /// Scan live balances and counters for the conservation audit.
    pub fn audit_totals(&self) -> Result<AuditTotals, LedgerError> {
        let mut vouch_balances = Amount::ZERO;
        for entry in self.ledger.scan_prefix(keys::VOUCH_PREFIX) {
            let (_, v) = entry?;
            let vouch: Vouch = canonical_decode(&v)?;
            vouch_balances = vouch_balances.checked_add(vouch.balance)?;
        }

        let mut rewards_balances = Amount::ZERO;
        for entry in self.ledger.scan_prefix(keys::REWARDS_PREFIX) {
            let (_, v) = entry?;
            rewards_balances = rewards_balances.checked_add(Amount(decode_u128_be(&v)?))?;
        }

        Ok(AuditTotals {
            total_deposited: self.meta_amount(keys::TOTAL_DEPOSITED)?,
            total_withdrawn: self.meta_amount(keys::TOTAL_WITHDRAWN)?,
            total_entry_fees: self.meta_amount(keys::TOTAL_ENTRY_FEES)?,
            vouch_balances,
            rewards_balances,
        })
    }

    // ========== Event log ==========

    /// Events with `seq >= from_seq`, in sequence order.
    pub fn events_since(&self, from_seq: u64) -> Result<Vec<SequencedEvent>, LedgerError> {
        let mut out = Vec::new();
        for entry in self.events.range(keys::event(from_seq)..) {
            let (k, v) = entry?;
            if !k.starts_with(keys::EVENT_PREFIX) {
                break;
            }
            out.push(canonical_decode::<SequencedEvent>(&v)?);
        }
        Ok(out)
    }

    /// Sequence number the next event will receive.
    pub fn next_event_seq(&self) -> Result<u64, LedgerError> {
        match self.events.get(keys::NEXT_EVENT_SEQ)? {
            Some(v) => decode_u64_be(&v),
            None => Ok(0),
        }
    }

    // ========== Fee configuration ==========

    /// Persisted fee configuration; zero rates before first admin set.
    pub fn fee_config(&self) -> Result<vouch_core::FeeConfig, LedgerError> {
        match self.ledger.get(keys::FEE_CONFIG)? {
            Some(v) => Ok(canonical_decode(&v)?),
            None => Ok(vouch_core::FeeConfig::zero()),
        }
    }

    /// Persist a fee configuration. Callers validate before storing.
    pub fn set_fee_config(&self, config: &vouch_core::FeeConfig) -> Result<(), LedgerError> {
        let bytes = vouch_core::canonical_encode(config)?;
        self.ledger.insert(keys::FEE_CONFIG, bytes)?;
        info!(
            entry_bps = config.entry_bps,
            donation_bps = config.donation_bps,
            pool_bps = config.pool_bps,
            "fee configuration updated"
        );
        Ok(())
    }
}
