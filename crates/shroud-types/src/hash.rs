//! 32-byte hashes, keys and key images.
//!
//! Everything 32 bytes wide shares one newtype that serializes as lowercase
//! hex, so snapshots and offline tx files stay human-readable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tiny_keccak::{Hasher, Keccak};

use crate::TypesError;

/// A 32-byte value: block/tx hash, public key, key image or commitment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32(pub [u8; 32]);

/// Block identifier.
pub type BlockHash = Hash32;
/// Transaction identifier.
pub type TxHash = Hash32;
/// Spent-output tag.
pub type KeyImage = Hash32;
/// Curve point encoded as 32 bytes.
pub type PublicKey = Hash32;

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypesError> {
        let bytes = hex::decode(s).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| TypesError::InvalidLength { expected: 32, got: v.len() })?;
        Ok(Hash32(arr))
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; 32]> for Hash32 {
    fn from(bytes: [u8; 32]) -> Self {
        Hash32(bytes)
    }
}

impl AsRef<[u8]> for Hash32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.short())
    }
}

impl FromStr for Hash32 {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash32::from_hex(s)
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash32::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Keccak
// =============================================================================

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> Hash32 {
    keccak256_parts(&[data])
}

/// Keccak-256 over the concatenation of `parts`.
pub fn keccak256_parts(parts: &[&[u8]]) -> Hash32 {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    Hash32(out)
}
