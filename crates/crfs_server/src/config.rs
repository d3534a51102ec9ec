//! Server configuration.

use crfs_store::DEFAULT_MAX_OPEN_JOURNALS;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Root of the persistent stores; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Whether uploaded blobs must hash to their address.
    pub verify_digests: bool,
    /// Whether `push_state` requires every hash to have a stored blob.
    pub require_blobs_before_push: bool,
    /// Whether blob requests must identify their caller.
    pub require_blob_owner: bool,
    /// Maximum number of hashes in one `push_state`.
    pub max_push_batch: usize,
    /// Maximum size of one uploaded blob, in bytes.
    pub max_blob_size: usize,
    /// Secret key for token verification; `None` trusts claimed user ids.
    pub auth_secret: Option<Vec<u8>>,
    /// How long issued tokens stay valid.
    pub token_expiry: Duration,
    /// Whether journal appends are synced to disk before acknowledging.
    pub sync_on_write: bool,
    /// How many filesystem journals stay open at once.
    pub max_open_journals: usize,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            data_dir: None,
            verify_digests: true,
            require_blobs_before_push: false,
            require_blob_owner: false,
            max_push_batch: 10_000,
            max_blob_size: 64 * 1024 * 1024,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
            sync_on_write: true,
            max_open_journals: DEFAULT_MAX_OPEN_JOURNALS,
        }
    }

    /// Persists state under `dir`.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Enables or disables blob digest verification.
    pub fn with_verify_digests(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }

    /// Requires blobs to be uploaded before their hashes are pushed.
    pub fn with_require_blobs_before_push(mut self, require: bool) -> Self {
        self.require_blobs_before_push = require;
        self
    }

    /// Requires blob requests to carry a caller identity.
    pub fn with_require_blob_owner(mut self, require: bool) -> Self {
        self.require_blob_owner = require;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets the maximum blob size.
    pub fn with_max_blob_size(mut self, size: usize) -> Self {
        self.max_blob_size = size;
        self
    }

    /// Enables token verification with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Enables or disables syncing journal appends.
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Sets how many filesystem journals stay open at once.
    pub fn with_max_open_journals(mut self, max: usize) -> Self {
        self.max_open_journals = max;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
