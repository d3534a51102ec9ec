//! Serve command implementation.

use crfs_server::{ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Options collected from the command line.
#[derive(Debug)]
pub struct ServeOptions {
    /// Listen address.
    pub bind: SocketAddr,
    /// Data directory; in-memory when absent.
    pub data_dir: Option<PathBuf>,
    /// Check blob digests.
    pub verify_digests: bool,
    /// Require blobs before push.
    pub require_blobs: bool,
    /// Require caller identity on blob routes.
    pub require_blob_owner: bool,
    /// Hex token secret.
    pub auth_secret: Option<String>,
    /// Token lifetime in seconds.
    pub token_expiry: u64,
    /// Push batch limit.
    pub max_push_batch: usize,
    /// Blob size limit.
    pub max_blob_size: usize,
    /// Sync journal appends.
    pub sync_on_write: bool,
    /// Journals kept open at once.
    pub max_open_journals: usize,
}

impl ServeOptions {
    /// Builds the server configuration.
    pub fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = ServerConfig::new(self.bind)
            .with_verify_digests(self.verify_digests)
            .with_require_blobs_before_push(self.require_blobs)
            .with_require_blob_owner(self.require_blob_owner)
            .with_max_push_batch(self.max_push_batch)
            .with_max_blob_size(self.max_blob_size)
            .with_token_expiry(Duration::from_secs(self.token_expiry))
            .with_sync_on_write(self.sync_on_write)
            .with_max_open_journals(self.max_open_journals);

        if let Some(dir) = self.data_dir {
            config = config.with_data_dir(dir);
        }
        if let Some(secret) = self.auth_secret {
            let secret = hex::decode(secret.trim()).map_err(|e| format!("auth secret: {e}"))?;
            if secret.is_empty() {
                return Err("auth secret must not be empty".into());
            }
            config = config.with_auth(secret);
        }
        Ok(config)
    }
}

/// Runs the serve command.
pub fn run(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.into_config()?;

    if config.data_dir.is_none() {
        warn!("no data directory given, state will be lost on exit");
    }
    if !config.verify_digests {
        warn!("blob digest verification is disabled");
    }
    info!(
        auth = config.auth_secret.is_some(),
        require_blobs = config.require_blobs_before_push,
        "starting server"
    );

    let server = SyncServer::new(config)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.serve_with_shutdown(shutdown_signal()))?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
