//! The sync protocol surface.

use crate::auth::{Caller, IdentityVerifier};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crfs_protocol::{FileSystemId, OpHash, UserId};
use crfs_store::{BlobStore, FileSystem, FileSystemRepo, OperationLog, PutOutcome, User, UserRepo};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Combines the directory, the operation log and the blob store, and
/// checks ownership on every call.
///
/// Keeps no state between calls.
pub struct SyncGateway {
    config: ServerConfig,
    users: Arc<dyn UserRepo>,
    filesystems: Arc<dyn FileSystemRepo>,
    oplog: Arc<dyn OperationLog>,
    blobs: Arc<dyn BlobStore>,
    verifier: Arc<dyn IdentityVerifier>,
}

impl SyncGateway {
    /// Creates a gateway over the given collaborators.
    pub fn new(
        config: ServerConfig,
        users: Arc<dyn UserRepo>,
        filesystems: Arc<dyn FileSystemRepo>,
        oplog: Arc<dyn OperationLog>,
        blobs: Arc<dyn BlobStore>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            config,
            users,
            filesystems,
            oplog,
            blobs,
            verifier,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Creates a user or replaces its display name.
    pub fn register_user(&self, user: UserId, display_name: Option<String>) -> ServerResult<User> {
        Ok(self.users.register_user(user, display_name)?)
    }

    /// Looks up a user.
    pub fn check_user(&self, user: UserId) -> ServerResult<User> {
        Ok(self.users.check_user(user)?)
    }

    /// Creates a filesystem owned by the caller, or updates one it owns.
    pub fn register_fs(
        &self,
        caller: &Caller,
        fs: FileSystemId,
        display_name: Option<String>,
        options: BTreeSet<String>,
    ) -> ServerResult<FileSystem> {
        self.verifier.verify(caller, &fs)?;
        Ok(self
            .filesystems
            .register_fs(caller.user, fs, display_name, options)?)
    }

    /// Looks up a filesystem owned by the caller.
    pub fn check_fs(&self, caller: &Caller, fs: FileSystemId) -> ServerResult<FileSystem> {
        self.authorize(caller, fs)
    }

    /// Returns every hash known for `fs`.
    ///
    /// # Errors
    ///
    /// - [`ServerError::FileSystemNotFound`] if `fs` is not registered
    /// - [`ServerError::OwnershipMismatch`] if the caller does not own it
    pub fn fetch_state(&self, caller: &Caller, fs: FileSystemId) -> ServerResult<BTreeSet<OpHash>> {
        self.authorize(caller, fs)?;
        let state = self.oplog.list(&fs)?;
        debug!(fs = %fs, hashes = state.len(), "fetched state");
        Ok(state)
    }

    /// Registers `hashes` in the log of `fs`, all or nothing.
    ///
    /// Returns how many hashes were new. An empty batch succeeds and
    /// changes nothing.
    ///
    /// # Errors
    ///
    /// Besides the checks of [`fetch_state`](Self::fetch_state), returns
    /// [`ServerError::MalformedInput`] for oversized batches and, when
    /// blobs are required first, for hashes without a stored blob.
    pub fn push_state(&self, caller: &Caller, fs: FileSystemId, hashes: &[OpHash]) -> ServerResult<usize> {
        self.authorize(caller, fs)?;

        if hashes.len() > self.config.max_push_batch {
            return Err(ServerError::MalformedInput(format!(
                "too many operations: {} > {}",
                hashes.len(),
                self.config.max_push_batch
            )));
        }
        if hashes.is_empty() {
            return Ok(0);
        }

        if self.config.require_blobs_before_push {
            let mut missing = HashSet::new();
            for hash in hashes {
                if !self.blobs.contains(&fs, hash)? {
                    missing.insert(hash);
                }
            }
            if !missing.is_empty() {
                warn!(fs = %fs, missing = missing.len(), "rejected push without blobs");
                return Err(ServerError::MalformedInput(format!(
                    "{} operation(s) have no uploaded content",
                    missing.len()
                )));
            }
        }

        let added = self.oplog.append_all(&fs, hashes)?;
        info!(fs = %fs, pushed = hashes.len(), added, "accepted push");
        Ok(added)
    }

    /// Reads the blob stored at `(fs, hash)`.
    pub fn get_blob(&self, caller: Option<&Caller>, fs: FileSystemId, hash: &OpHash) -> ServerResult<Vec<u8>> {
        self.authorize_blob(caller, fs)?;
        Ok(self.blobs.get(&fs, hash)?)
    }

    /// Stores a blob at `(fs, hash)`.
    pub fn put_blob(
        &self,
        caller: Option<&Caller>,
        fs: FileSystemId,
        hash: &OpHash,
        data: &[u8],
    ) -> ServerResult<PutOutcome> {
        self.authorize_blob(caller, fs)?;
        if data.len() > self.config.max_blob_size {
            return Err(ServerError::TooLarge {
                size: data.len(),
                limit: self.config.max_blob_size,
            });
        }
        Ok(self.blobs.put(&fs, hash, data)?)
    }

    /// Resolves `fs` and checks that the caller owns it.
    fn authorize(&self, caller: &Caller, fs: FileSystemId) -> ServerResult<FileSystem> {
        let record = self
            .filesystems
            .get_filesystem(fs)?
            .ok_or(ServerError::FileSystemNotFound(fs))?;

        self.verifier.verify(caller, &fs)?;

        if record.owner != caller.user {
            warn!(fs = %fs, user = %caller.user, "rejected access by non-owner");
            return Err(ServerError::OwnershipMismatch(fs));
        }
        Ok(record)
    }

    fn authorize_blob(&self, caller: Option<&Caller>, fs: FileSystemId) -> ServerResult<()> {
        match caller {
            Some(caller) => self.authorize(caller, fs).map(|_| ()),
            None if self.config.require_blob_owner => Err(ServerError::OwnershipMismatch(fs)),
            None => {
                self.filesystems
                    .get_filesystem(fs)?
                    .ok_or(ServerError::FileSystemNotFound(fs))?;
                Ok(())
            }
        }
    }
}
