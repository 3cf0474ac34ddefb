//! Shared helpers for sled transactions.
//!
//! All mutating ledger operations run inside a transaction over the
//! `(ledger, events)` tree pair. Domain failures abort the transaction via
//! `ConflictableTransactionError::Abort`, which rolls back every write made
//! so far in the same operation.

use crate::{decode_u128_be, decode_u64_be, keys, LedgerError};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use vouch_core::{canonical_decode, canonical_encode, Amount, LedgerEvent, SequencedEvent};

pub(crate) type TxResult<T> = Result<T, ConflictableTransactionError<LedgerError>>;

pub(crate) fn abort<T>(err: LedgerError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

pub(crate) fn tx_err(err: impl Into<LedgerError>) -> ConflictableTransactionError<LedgerError> {
    ConflictableTransactionError::Abort(err.into())
}

/// Unwrap a finished transaction into a plain ledger result.
pub(crate) fn finish<T>(result: Result<T, TransactionError<LedgerError>>) -> Result<T, LedgerError> {
    match result {
        Ok(v) => Ok(v),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(LedgerError::Sled(e)),
    }
}

pub(crate) fn tx_get_record<T: DeserializeOwned>(
    tree: &TransactionalTree,
    key: &[u8],
) -> TxResult<Option<T>> {
    match tree.get(key)? {
        Some(v) => canonical_decode(&v).map(Some).map_err(tx_err),
        None => Ok(None),
    }
}

pub(crate) fn tx_put_record<T: Serialize>(
    tree: &TransactionalTree,
    key: &[u8],
    value: &T,
) -> TxResult<()> {
    let bytes = canonical_encode(value).map_err(tx_err)?;
    tree.insert(key, bytes)?;
    Ok(())
}

pub(crate) fn tx_get_amount(tree: &TransactionalTree, key: &[u8]) -> TxResult<Amount> {
    match tree.get(key)? {
        Some(v) => decode_u128_be(&v).map(Amount).map_err(tx_err),
        None => Ok(Amount::ZERO),
    }
}

pub(crate) fn tx_put_amount(tree: &TransactionalTree, key: &[u8], amount: Amount) -> TxResult<()> {
    tree.insert(key, amount.to_be_bytes().to_vec())?;
    Ok(())
}

/// Read-add-write an amount slot; returns the new value.
pub(crate) fn tx_add_amount(
    tree: &TransactionalTree,
    key: &[u8],
    delta: Amount,
) -> TxResult<Amount> {
    let current = tx_get_amount(tree, key)?;
    let updated = current.checked_add(delta).map_err(tx_err)?;
    tx_put_amount(tree, key, updated)?;
    Ok(updated)
}

pub(crate) fn tx_get_u64(tree: &TransactionalTree, key: &[u8], default: u64) -> TxResult<u64> {
    match tree.get(key)? {
        Some(v) => decode_u64_be(&v).map_err(tx_err),
        None => Ok(default),
    }
}

pub(crate) fn tx_put_u64(tree: &TransactionalTree, key: &[u8], value: u64) -> TxResult<()> {
    tree.insert(key, value.to_be_bytes().to_vec())?;
    Ok(())
}

/// In-transaction cursor over the append-only event log.
///
/// Load once per transaction, append any number of events, then store the
/// advanced sequence counter before returning. If the transaction aborts,
/// both the events and the counter roll back together.
pub(crate) struct EventCtx {
    next_seq: u64,
}

impl EventCtx {
    pub(crate) fn load(events: &TransactionalTree) -> TxResult<Self> {
        let next_seq = tx_get_u64(events, keys::NEXT_EVENT_SEQ, 0)?;
        Ok(Self { next_seq })
    }

    pub(crate) fn append(
        &mut self,
        events: &TransactionalTree,
        at_ms: u64,
        event: LedgerEvent,
    ) -> TxResult<u64> {
        let seq = self.next_seq;
        let record = SequencedEvent { seq, at_ms, event };
        tx_put_record(events, &keys::event(seq), &record)?;
        self.next_seq = seq
            .checked_add(1)
            .ok_or_else(|| tx_err(LedgerError::Decode("event sequence overflow".into())))?;
        Ok(seq)
    }

    pub(crate) fn store(&self, events: &TransactionalTree) -> TxResult<()> {
        tx_put_u64(events, keys::NEXT_EVENT_SEQ, self.next_seq)
    }
}
