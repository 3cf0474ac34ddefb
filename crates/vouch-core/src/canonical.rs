//! Canonical serialization for ledger records.
//!
//! Every record persisted by `vouch-ledger` goes through this encoding so
//! that stored bytes are stable across versions and platforms.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Canonical serialization errors.
#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("hex decode error: {0}")]
    FromHex(String),
}

impl CanonicalError {
    pub(crate) fn from_hex(err: impl ToString) -> Self {
        Self::FromHex(err.to_string())
    }
}

/// Canonical encoder options (fixed-int, little-endian, no trailing bytes).
fn encoder() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

/// Serialize using canonical encoding.
pub fn canonical_encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    encoder().serialize(value).map_err(CanonicalError::from)
}

/// Decode canonical bytes back into the target structure.
pub fn canonical_decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CanonicalError> {
    encoder().deserialize(bytes).map_err(CanonicalError::from)
}
