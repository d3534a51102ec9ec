//! # CRFS Store
//!
//! Durable state of the CRFS sync server.
//!
//! This crate provides:
//! - [`OperationLog`]: the per-filesystem set of known operation hashes,
//!   persisted as an append-only [journal](journal) of checksummed batches
//! - [`BlobStore`]: hash-addressed operation bytes, one namespace per
//!   filesystem, written atomically
//! - [`Directory`]: users, filesystems and replicas, exposed through the
//!   [`UserRepo`], [`FileSystemRepo`] and [`ReplicaRepo`] traits
//! - [`StorageBackend`]: the byte store the journal is written to
//!
//! ## Layout on disk
//!
//! ```text
//! <data_dir>/
//!   directory.json          users, filesystems, replicas
//!   oplog/<fs-uuid>.log     one journal per filesystem
//!   blobs/<fs-uuid>/<hex>   one file per operation
//! ```
//!
//! All stores also come in an in-memory flavour for tests and ephemeral
//! servers.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod atomic;
mod backend;
mod blob;
mod directory;
mod error;
mod file;
pub mod journal;
mod memory;
mod oplog;

pub use backend::StorageBackend;
pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore, PutOutcome};
pub use directory::{
    Directory, FileSystem, FileSystemRepo, Replica, ReplicaRepo, User, UserRepo,
};
pub use error::{StoreError, StoreResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use oplog::{JournalOperationLog, OperationLog, DEFAULT_MAX_OPEN_JOURNALS};

/// Directory name of the operation journals under a data directory.
pub const OPLOG_DIR: &str = "oplog";

/// Directory name of the blob namespaces under a data directory.
pub const BLOB_DIR: &str = "blobs";

/// File name of the directory snapshot under a data directory.
pub const DIRECTORY_FILE: &str = "directory.json";

/// Current time as Unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
