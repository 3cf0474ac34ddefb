//! Subject identities and their canonical ledger keys.
//!
//! A subject can be referred to in three forms: a registered profile, a
//! blockchain address, or a social attestation hash. Monetary claims may be
//! made against any of the three; the ledger keys them by [`SubjectKey`],
//! which stays `Pending*` until an external binding event associates the
//! address or attestation with a profile.

use crate::canonical::CanonicalError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registered profile identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProfileId(pub u64);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "profile-{}", self.0)
    }
}

/// 20-byte account address, lowercase hex in JSON.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CanonicalError> {
        let raw = hex::decode(s.trim_start_matches("0x")).map_err(CanonicalError::from_hex)?;
        let bytes: [u8; 20] = raw
            .try_into()
            .map_err(|_| CanonicalError::from_hex("expected 20-byte address"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// 32-byte hash identifying a social attestation, hex in JSON.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttestationHash(pub [u8; 32]);

impl AttestationHash {
    /// Deterministic hash for an attestation of `account` on `service`.
    pub fn derive(service: &str, account: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(service.as_bytes());
        hasher.update(&[0]);
        hasher.update(account.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CanonicalError> {
        let raw = hex::decode(s).map_err(CanonicalError::from_hex)?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| CanonicalError::from_hex("expected 32-byte attestation hash"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for AttestationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttestationHash").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for AttestationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for AttestationHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AttestationHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        AttestationHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// How a caller refers to a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectDescriptor {
    Profile(ProfileId),
    Address(Address),
    Attestation(AttestationHash),
}

impl SubjectDescriptor {
    /// The ledger key this descriptor maps to when no binding exists.
    pub fn unresolved_key(self) -> SubjectKey {
        match self {
            SubjectDescriptor::Profile(id) => SubjectKey::Profile(id),
            SubjectDescriptor::Address(a) => SubjectKey::PendingAddress(a),
            SubjectDescriptor::Attestation(h) => SubjectKey::PendingAttestation(h),
        }
    }
}

impl fmt::Display for SubjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectDescriptor::Profile(id) => write!(f, "{id}"),
            SubjectDescriptor::Address(a) => write!(f, "address-{a}"),
            SubjectDescriptor::Attestation(h) => write!(f, "attestation-{h}"),
        }
    }
}

// Key tag bytes. Stable; persisted in every index key.
const KEY_TAG_PROFILE: u8 = 0x01;
const KEY_TAG_ADDRESS: u8 = 0x02;
const KEY_TAG_ATTESTATION: u8 = 0x03;

/// Canonical ledger key for a subject.
///
/// `PendingAddress` and `PendingAttestation` keys are permanently superseded
/// by a `Profile` key once the binding event fires; the rewards ledger merges
/// their balances at that moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKey {
    Profile(ProfileId),
    PendingAddress(Address),
    PendingAttestation(AttestationHash),
}

impl SubjectKey {
    pub fn is_pending(self) -> bool {
        !matches!(self, SubjectKey::Profile(_))
    }

    /// Stable prefix-tagged byte encoding, used as sled key material.
    pub fn encode(self) -> Vec<u8> {
        match self {
            SubjectKey::Profile(id) => {
                let mut out = Vec::with_capacity(9);
                out.push(KEY_TAG_PROFILE);
                out.extend_from_slice(&id.0.to_be_bytes());
                out
            }
            SubjectKey::PendingAddress(a) => {
                let mut out = Vec::with_capacity(21);
                out.push(KEY_TAG_ADDRESS);
                out.extend_from_slice(&a.0);
                out
            }
            SubjectKey::PendingAttestation(h) => {
                let mut out = Vec::with_capacity(33);
                out.push(KEY_TAG_ATTESTATION);
                out.extend_from_slice(&h.0);
                out
            }
        }
    }

    /// Decode a key produced by [`SubjectKey::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, CanonicalError> {
        let (tag, rest) = bytes
            .split_first()
            .ok_or_else(|| CanonicalError::from_hex("empty subject key"))?;
        match *tag {
            KEY_TAG_PROFILE => {
                let raw: [u8; 8] = rest
                    .try_into()
                    .map_err(|_| CanonicalError::from_hex("bad profile key length"))?;
                Ok(SubjectKey::Profile(ProfileId(u64::from_be_bytes(raw))))
            }
            KEY_TAG_ADDRESS => {
                let raw: [u8; 20] = rest
                    .try_into()
                    .map_err(|_| CanonicalError::from_hex("bad address key length"))?;
                Ok(SubjectKey::PendingAddress(Address(raw)))
            }
            KEY_TAG_ATTESTATION => {
                let raw: [u8; 32] = rest
                    .try_into()
                    .map_err(|_| CanonicalError::from_hex("bad attestation key length"))?;
                Ok(SubjectKey::PendingAttestation(AttestationHash(raw)))
            }
            other => Err(CanonicalError::from_hex(format!(
                "unknown subject key tag {other:#04x}"
            ))),
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKey::Profile(id) => write!(f, "{id}"),
            SubjectKey::PendingAddress(a) => write!(f, "pending-address-{a}"),
            SubjectKey::PendingAttestation(h) => write!(f, "pending-attestation-{h}"),
        }
    }
}

/// Outcome of resolving a subject descriptor against the binding map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Descriptor maps to a registered profile.
    Resolved(ProfileId),
    /// No binding yet; claims accrue under the pending key.
    Pending(SubjectKey),
}

impl Resolution {
    /// The canonical ledger key for this resolution.
    pub fn key(self) -> SubjectKey {
        match self {
            Resolution::Resolved(id) => SubjectKey::Profile(id),
            Resolution::Pending(key) => key,
        }
    }

    pub fn profile(self) -> Option<ProfileId> {
        match self {
            Resolution::Resolved(id) => Some(id),
            Resolution::Pending(_) => None,
        }
    }
}
