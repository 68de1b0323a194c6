//! SHA-256 content digest used as the content address of an upload.

use std::{fmt, str::FromStr};
use thiserror::Error;

/// Length of the digest in bytes (256 bits).
pub const DIGEST_LEN: usize = 32;

/// Number of hex characters in the full rendering.
pub const DIGEST_HEX_LEN: usize = DIGEST_LEN * 2;

/// Number of hex characters in the short form of a digest (32 bits).
pub const SHORT_DIGEST_LEN: usize = 8;

/// A 256-bit content digest.
///
/// Rendered as 64 lowercase hex characters. The first [`SHORT_DIGEST_LEN`]
/// characters form the short digest used in storage keys and lookup paths.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; DIGEST_LEN]);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid content digest `{0}`")]
pub struct ParseDigestError(String);

impl ContentDigest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Full lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters of the digest.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..SHORT_DIGEST_LEN / 2])
    }
}

impl FromStr for ContentDigest {
    type Err = ParseDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| ParseDigestError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}
