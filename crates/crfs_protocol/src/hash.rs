//! Operation hashes.

use crate::error::{ProtocolError, ProtocolResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Content address of an operation.
///
/// On the wire a hash travels two ways:
/// - inside JSON payloads as a list of integers `0..=255`
/// - in blob URLs as a lowercase hex string
///
/// Both renderings are exact inverses of each other, leading zero bytes
/// included. Replicas hash operations with SHA-256, so most hashes are
/// [`OpHash::DIGEST_LEN`] bytes, but the log accepts any length between 1
/// and [`OpHash::MAX_LEN`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct OpHash(Vec<u8>);

impl OpHash {
    /// Length of a SHA-256 digest.
    pub const DIGEST_LEN: usize = 32;

    /// Longest hash the server will store.
    pub const MAX_LEN: usize = 64;

    /// Creates a hash from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidHashLength`] for empty input or input
    /// longer than [`Self::MAX_LEN`].
    pub fn new(bytes: Vec<u8>) -> ProtocolResult<Self> {
        if bytes.is_empty() || bytes.len() > Self::MAX_LEN {
            return Err(ProtocolError::InvalidHashLength(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// Computes the SHA-256 address of `data`.
    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).to_vec())
    }

    /// Returns true if `data` hashes to this address.
    #[must_use]
    pub fn matches(&self, data: &[u8]) -> bool {
        Sha256::digest(data).as_slice() == self.0.as_slice()
    }

    /// Parses a hex rendering (as used in blob URLs).
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not even-length hex or decodes to
    /// an unacceptable length.
    pub fn from_hex(s: &str) -> ProtocolResult<Self> {
        let bytes = hex::decode(s).map_err(|_| ProtocolError::InvalidHex(s.to_string()))?;
        Self::new(bytes)
    }

    /// Renders the hash as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hash length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; hashes are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<u8>> for OpHash {
    type Error = ProtocolError;

    fn try_from(bytes: Vec<u8>) -> ProtocolResult<Self> {
        Self::new(bytes)
    }
}

impl From<OpHash> for Vec<u8> {
    fn from(hash: OpHash) -> Self {
        hash.0
    }
}

impl FromStr for OpHash {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for OpHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for OpHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpHash({})", self.to_hex())
    }
}
