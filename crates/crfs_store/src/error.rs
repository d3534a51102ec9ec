//! Error types for store operations.

use crfs_protocol::{FileSystemId, OpHash, UserId};
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The user is not registered.
    #[error("unknown user {0}")]
    UserNotFound(UserId),

    /// The filesystem is not registered.
    #[error("unknown filesystem {0}")]
    FileSystemNotFound(FileSystemId),

    /// The filesystem belongs to a different user.
    #[error("filesystem {fs} is owned by another user")]
    OwnershipMismatch {
        /// The filesystem in question.
        fs: FileSystemId,
    },

    /// No blob is stored under the address.
    #[error("no blob {hash} in filesystem {fs}")]
    BlobNotFound {
        /// Filesystem namespace.
        fs: FileSystemId,
        /// Requested hash.
        hash: OpHash,
    },

    /// The bytes do not hash to the address they were offered under.
    #[error("content does not match hash {hash}")]
    DigestMismatch {
        /// Claimed hash.
        hash: OpHash,
    },

    /// Different bytes are already stored under the address.
    #[error("different content already stored under hash {hash}")]
    ContentConflict {
        /// Contested hash.
        hash: OpHash,
    },

    /// A journal or snapshot failed validation.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        StoreError::Corrupted(message.into())
    }

    /// Returns true for content-address violations.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            StoreError::DigestMismatch { .. } | StoreError::ContentConflict { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
