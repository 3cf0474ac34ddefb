//! Observable ledger events.
//!
//! Every state mutation appends one or more events to the ledger's event
//! log. External indexers and tests consume them via the engine's
//! `events_since` read surface.

use crate::amount::Amount;
use crate::fees::FeeSplit;
use crate::identity::{Address, ProfileId, SubjectKey};
use crate::VouchId;
use serde::{Deserialize, Serialize};

/// A single observable event.
///
/// Externally tagged (serde's default): the canonical bincode encoding is
/// self-describing per variant and round-trips without `deserialize_any`,
/// which bincode cannot provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Donation share credited to a subject's rewards balance.
    RewardsDeposited { subject: SubjectKey, amount: Amount },
    /// Pending balance merged into a profile on binding.
    RewardsMerged {
        pending: SubjectKey,
        profile: ProfileId,
        amount: Amount,
    },
    /// Rewards claimed and paid out.
    RewardsWithdrawn {
        profile: ProfileId,
        payout: Address,
        amount: Amount,
    },
    /// New vouch created.
    VouchCreated {
        vouch: VouchId,
        author: ProfileId,
        subject: SubjectKey,
        deposit: Amount,
        split: FeeSplit,
        balance: Amount,
    },
    /// Existing vouch increased.
    VouchIncreased {
        vouch: VouchId,
        subject: SubjectKey,
        deposit: Amount,
        split: FeeSplit,
        balance: Amount,
    },
    /// Pool share credited to an existing vouch.
    PoolCredited { vouch: VouchId, amount: Amount },
    /// Vouch archived following subject profile archival.
    VouchArchived { vouch: VouchId, subject: SubjectKey },
}

/// An event with its position in the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEvent {
    /// Strictly increasing sequence number, unique across the ledger.
    pub seq: u64,
    /// Wall-clock timestamp supplied by the caller (ms since epoch).
    pub at_ms: u64,
    pub event: LedgerEvent,
}
