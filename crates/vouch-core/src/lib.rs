#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

//! Core types and deterministic accounting primitives for the vouch protocol.
//!
//! This crate defines the shared abstractions used by the ledger and the
//! lifecycle engine: subject identities and their canonical keys, integer
//! amounts, the basis-point fee split, and the pro-rata vouchers-pool
//! distributor. Everything here is pure and deterministic; persistence and
//! orchestration live in `vouch-ledger` and `vouch-engine`.

use serde::{Deserialize, Serialize};

pub mod amount;
pub mod canonical;
pub mod distribution;
pub mod events;
pub mod fees;
pub mod identity;

pub use amount::{Amount, AmountError};
pub use canonical::{canonical_decode, canonical_encode, CanonicalError};
pub use distribution::{distribute_pool, DistributeError, PoolCredit};
pub use events::{LedgerEvent, SequencedEvent};
pub use fees::{split_deposit, FeeConfig, FeeError, FeeSplit, BASIS_POINTS};
pub use identity::{Address, AttestationHash, ProfileId, Resolution, SubjectDescriptor, SubjectKey};

/// Monotonically assigned vouch identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VouchId(pub u64);

impl VouchId {
    /// Big-endian key bytes, so vouch ids iterate in ascending order.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl std::fmt::Display for VouchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vouch-{}", self.0)
    }
}

/// A staked relationship from an author profile to a subject identity.
///
/// The subject key is frozen at creation time: if a pending address or
/// attestation is later bound to a profile, only the rewards ledger merges;
/// the vouch record keeps its historical subject descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vouch {
    pub id: VouchId,
    pub author: ProfileId,
    pub subject: SubjectKey,
    /// Staked balance in smallest currency units.
    pub balance: Amount,
    /// Creation timestamp (ms since epoch).
    pub created_at_ms: u64,
    /// One-way flag set when the subject's profile is archived.
    pub archived: bool,
}

impl Vouch {
    pub fn is_active(&self) -> bool {
        !self.archived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vouch_id_key_bytes_preserve_ordering() {
        let a = VouchId(1).to_be_bytes();
        let b = VouchId(2).to_be_bytes();
        let c = VouchId(1 << 40).to_be_bytes();
        assert!(a < b);
        assert!(b < c);
        assert_eq!(VouchId::from_be_bytes(c), VouchId(1 << 40));
    }
}
