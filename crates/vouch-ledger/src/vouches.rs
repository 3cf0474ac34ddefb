//! Vouch record operations: create, increase, archive.
//!
//! Create and increase share one deposit pipeline: resolve the subject,
//! split the deposit, credit the donation share to the rewards entry,
//! distribute the pool share across the subject's other active vouches, and
//! persist the vouch record, all inside a single sled transaction, so a
//! failure at any step (including mid-distribution) rolls everything back.

use crate::txn::{
    abort, finish, tx_add_amount, tx_err, tx_get_record, tx_get_u64, tx_put_record, tx_put_u64,
    EventCtx, TxResult,
};
use crate::{keys, LedgerError, LedgerStorage};
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionalTree;
use sled::Transactional;
use tracing::info;
use vouch_core::{
    distribute_pool, split_deposit, Amount, FeeConfig, FeeSplit, LedgerEvent, PoolCredit,
    ProfileId, Resolution, SubjectDescriptor, SubjectKey, Vouch, VouchId,
};

/// Receipt for a create or increase deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub vouch: Vouch,
    /// How the subject descriptor resolved at deposit time.
    pub resolution: Resolution,
    pub deposit: Amount,
    pub split: FeeSplit,
    /// Pool increments applied to the subject's other vouches.
    pub credits: Vec<PoolCredit>,
}

// ========== In-transaction helpers ==========

fn tx_resolve(ledger: &TransactionalTree, descriptor: SubjectDescriptor) -> TxResult<Resolution> {
    let key = descriptor.unresolved_key();
    if let SubjectKey::Profile(id) = key {
        return Ok(Resolution::Resolved(id));
    }
    match ledger.get(keys::binding(key))? {
        Some(v) => {
            let id = crate::decode_u64_be(&v).map_err(tx_err)?;
            Ok(Resolution::Resolved(ProfileId(id)))
        }
        None => Ok(Resolution::Pending(key)),
    }
}

fn tx_bound_keys(ledger: &TransactionalTree, profile: ProfileId) -> TxResult<Vec<SubjectKey>> {
    Ok(tx_get_record(ledger, &keys::bound_keys(profile))?.unwrap_or_default())
}

fn tx_subject_ids(ledger: &TransactionalTree, subject: SubjectKey) -> TxResult<Vec<VouchId>> {
    Ok(tx_get_record(ledger, &keys::subject_list(subject))?.unwrap_or_default())
}

fn tx_get_vouch(ledger: &TransactionalTree, id: VouchId) -> TxResult<Option<Vouch>> {
    tx_get_record(ledger, &keys::vouch(id))
}

fn tx_require_vouch(ledger: &TransactionalTree, id: VouchId) -> TxResult<Vouch> {
    match tx_get_vouch(ledger, id)? {
        Some(v) => Ok(v),
        None => abort(LedgerError::VouchNotFound(id)),
    }
}

/// Active vouches for the resolved subject, ascending by id.
///
/// For a resolved profile the set spans the profile key and all pending keys
/// bound to it, so vouchers who staked before the subject registered keep
/// participating in pool distributions.
fn tx_active_vouches(
    ledger: &TransactionalTree,
    resolution: Resolution,
) -> TxResult<Vec<Vouch>> {
    let mut subject_keys = vec![resolution.key()];
    if let Resolution::Resolved(profile) = resolution {
        subject_keys.extend(tx_bound_keys(ledger, profile)?);
    }

    let mut out = Vec::new();
    for subject in subject_keys {
        for id in tx_subject_ids(ledger, subject)? {
            let vouch = tx_require_vouch(ledger, id)?;
            if vouch.is_active() {
                out.push(vouch);
            }
        }
    }
    out.sort_by_key(|v| v.id);
    Ok(out)
}

/// Apply the donation share and pool credits common to create and increase.
fn tx_apply_distribution(
    ledger: &TransactionalTree,
    events: &TransactionalTree,
    ctx: &mut EventCtx,
    subject: SubjectKey,
    split: &FeeSplit,
    credits: &[PoolCredit],
    now_ms: u64,
) -> TxResult<()> {
    if !split.donation_share.is_zero() {
        tx_add_amount(ledger, &keys::rewards(subject), split.donation_share)?;
        ctx.append(
            events,
            now_ms,
            LedgerEvent::RewardsDeposited {
                subject,
                amount: split.donation_share,
            },
        )?;
    }

    for credit in credits {
        if credit.amount.is_zero() {
            continue;
        }
        let mut target = tx_require_vouch(ledger, credit.vouch)?;
        target.balance = target.balance.checked_add(credit.amount).map_err(tx_err)?;
        tx_put_record(ledger, &keys::vouch(target.id), &target)?;
        ctx.append(
            events,
            now_ms,
            LedgerEvent::PoolCredited {
                vouch: credit.vouch,
                amount: credit.amount,
            },
        )?;
    }

    Ok(())
}

/// Pool distribution inputs: other active vouches that can actually receive
/// a pro-rata share (positive balance).
fn distribution_set(others: &[Vouch]) -> Vec<(VouchId, Amount)> {
    others
        .iter()
        .filter(|v| !v.balance.is_zero())
        .map(|v| (v.id, v.balance))
        .collect()
}

impl LedgerStorage {
    /// Create a vouch from `author` to the subject behind `descriptor`.
    ///
    /// The subject key frozen into the record is the canonical key at
    /// creation time; later bindings merge rewards but never rewrite vouch
    /// records. Duplicate prevention matches on that canonical key, so
    /// vouching the same person by address and by attestation collapses to
    /// one relationship.
    pub fn create_vouch(
        &self,
        author: ProfileId,
        descriptor: SubjectDescriptor,
        deposit: Amount,
        config: &FeeConfig,
        now_ms: u64,
    ) -> Result<DepositReceipt, LedgerError> {
        let result = (self.tree(), self.events_tree()).transaction(|(ledger, events)| {
            let resolution = tx_resolve(ledger, descriptor)?;
            let subject = resolution.key();

            // Duplicate check against the canonical key. A vouch made while
            // the subject was pending and later rebound lives under its old
            // key and intentionally does not block a fresh vouch here.
            if let Some(v) = ledger.get(keys::author_subject(author, subject))? {
                let existing = VouchId(crate::decode_u64_be(&v).map_err(tx_err)?);
                if tx_require_vouch(ledger, existing)?.is_active() {
                    return abort(LedgerError::DuplicateVouch { author, subject });
                }
            }

            let others = tx_active_vouches(ledger, resolution)?;
            let recipients = distribution_set(&others);
            let split = split_deposit(deposit, config, !recipients.is_empty()).map_err(tx_err)?;
            let credits = distribute_pool(split.pool_share, &recipients).map_err(tx_err)?;

            let mut ctx = EventCtx::load(events)?;
            tx_apply_distribution(ledger, events, &mut ctx, subject, &split, &credits, now_ms)?;

            let id = VouchId(tx_get_u64(ledger, keys::NEXT_VOUCH_ID, 1)?);
            let next = id
                .0
                .checked_add(1)
                .ok_or_else(|| tx_err(LedgerError::Decode("vouch id space exhausted".into())))?;
            tx_put_u64(ledger, keys::NEXT_VOUCH_ID, next)?;

            let vouch = Vouch {
                id,
                author,
                subject,
                balance: split.net_stake,
                created_at_ms: now_ms,
                archived: false,
            };
            tx_put_record(ledger, &keys::vouch(id), &vouch)?;

            let mut ids = tx_subject_ids(ledger, subject)?;
            ids.push(id);
            tx_put_record(ledger, &keys::subject_list(subject), &ids)?;
            ledger.insert(keys::author_subject(author, subject), id.0.to_be_bytes().to_vec())?;

            tx_add_amount(ledger, keys::TOTAL_DEPOSITED, deposit)?;
            tx_add_amount(ledger, keys::TOTAL_ENTRY_FEES, split.entry_fee)?;

            ctx.append(
                events,
                now_ms,
                LedgerEvent::VouchCreated {
                    vouch: id,
                    author,
                    subject,
                    deposit,
                    split,
                    balance: vouch.balance,
                },
            )?;
            ctx.store(events)?;

            Ok(DepositReceipt {
                vouch,
                resolution,
                deposit,
                split,
                credits,
            })
        });
        let receipt = finish(result)?;

        info!(
            vouch = %receipt.vouch.id,
            author = %author,
            subject = %receipt.vouch.subject,
            deposit = %deposit,
            net_stake = %receipt.split.net_stake,
            "vouch created"
        );
        Ok(receipt)
    }

    /// Add a deposit to an existing vouch.
    ///
    /// Runs the same split/deposit/distribute pipeline as
    /// [`Self::create_vouch`]; because the vouch itself already exists and is
    /// excluded from its own distribution, the pool fee is charged whenever
    /// any *other* voucher for the subject exists.
    pub fn increase_vouch(
        &self,
        id: VouchId,
        descriptor: SubjectDescriptor,
        deposit: Amount,
        config: &FeeConfig,
        now_ms: u64,
    ) -> Result<DepositReceipt, LedgerError> {
        let result = (self.tree(), self.events_tree()).transaction(|(ledger, events)| {
            let mut vouch = tx_require_vouch(ledger, id)?;
            if vouch.archived {
                return abort(LedgerError::VouchArchived(id));
            }

            let resolution = tx_resolve(ledger, descriptor)?;
            let subject = resolution.key();

            // The descriptor must refer to the vouch's subject: either the
            // recorded key itself, or its post-binding profile key.
            let consistent = subject == vouch.subject
                || match resolution {
                    Resolution::Resolved(profile) => {
                        tx_bound_keys(ledger, profile)?.contains(&vouch.subject)
                    }
                    Resolution::Pending(_) => false,
                };
            if !consistent {
                return abort(LedgerError::SubjectMismatch {
                    vouch: id,
                    recorded: vouch.subject,
                    resolved: subject,
                });
            }

            let others: Vec<Vouch> = tx_active_vouches(ledger, resolution)?
                .into_iter()
                .filter(|v| v.id != id)
                .collect();
            let recipients = distribution_set(&others);
            let split = split_deposit(deposit, config, !recipients.is_empty()).map_err(tx_err)?;
            let credits = distribute_pool(split.pool_share, &recipients).map_err(tx_err)?;

            let mut ctx = EventCtx::load(events)?;
            tx_apply_distribution(ledger, events, &mut ctx, subject, &split, &credits, now_ms)?;

            vouch.balance = vouch.balance.checked_add(split.net_stake).map_err(tx_err)?;
            tx_put_record(ledger, &keys::vouch(id), &vouch)?;

            tx_add_amount(ledger, keys::TOTAL_DEPOSITED, deposit)?;
            tx_add_amount(ledger, keys::TOTAL_ENTRY_FEES, split.entry_fee)?;

            ctx.append(
                events,
                now_ms,
                LedgerEvent::VouchIncreased {
                    vouch: id,
                    subject,
                    deposit,
                    split,
                    balance: vouch.balance,
                },
            )?;
            ctx.store(events)?;

            Ok(DepositReceipt {
                vouch,
                resolution,
                deposit,
                split,
                credits,
            })
        });
        let receipt = finish(result)?;

        info!(
            vouch = %id,
            deposit = %deposit,
            balance = %receipt.vouch.balance,
            "vouch increased"
        );
        Ok(receipt)
    }

    /// Archive every active vouch whose subject is `profile`, including
    /// vouches recorded under pending keys later bound to it.
    ///
    /// Triggered by the identity registry when the profile is archived.
    /// One-way: balances and accrued rewards are untouched and remain
    /// claimable.
    pub fn archive_profile_vouches(
        &self,
        profile: ProfileId,
        now_ms: u64,
    ) -> Result<Vec<VouchId>, LedgerError> {
        let result = (self.tree(), self.events_tree()).transaction(|(ledger, events)| {
            let mut ctx = EventCtx::load(events)?;
            let mut archived = Vec::new();

            let mut subject_keys = vec![SubjectKey::Profile(profile)];
            subject_keys.extend(tx_bound_keys(ledger, profile)?);

            for subject in subject_keys {
                for id in tx_subject_ids(ledger, subject)? {
                    let mut vouch = tx_require_vouch(ledger, id)?;
                    if vouch.archived {
                        continue;
                    }
                    vouch.archived = true;
                    tx_put_record(ledger, &keys::vouch(id), &vouch)?;
                    ctx.append(
                        events,
                        now_ms,
                        LedgerEvent::VouchArchived { vouch: id, subject },
                    )?;
                    archived.push(id);
                }
            }

            ctx.store(events)?;
            Ok(archived)
        });
        let archived = finish(result)?;

        info!(profile = %profile, count = archived.len(), "subject vouches archived");
        Ok(archived)
    }
}
