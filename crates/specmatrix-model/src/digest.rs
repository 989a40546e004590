//! Content-integrity digests
//!
//! [`ContentDigest`] is the SHA-256 of a raw upload. The blob store is keyed
//! by it and extraction re-checks it before trusting stored bytes.

use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte SHA-256 content digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Wrap raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Digest of `data`
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Whether `data` hashes to this digest
    #[must_use]
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }

    /// Short form (first 16 hex chars) for logs
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Digest parsing errors
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// Not hex
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Wrong length
    #[error("invalid digest length: expected 32, got {0}")]
    InvalidLength(usize),
}

impl FromStr for ContentDigest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| DigestError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl serde::Serialize for ContentDigest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentDigest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_vector() {
        let digest = ContentDigest::compute(b"abc");
        assert_eq!(
            digest.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(digest.matches(b"abc"));
        assert!(!digest.matches(b"abd"));
    }

    #[test]
    fn digest_parse_rejects_short_input() {
        assert!(matches!(
            "abcd".parse::<ContentDigest>(),
            Err(DigestError::InvalidLength(2))
        ));
    }
}
