//! Main sync server.

use crate::auth::{AuthConfig, ClaimedIdentity, IdentityVerifier, TokenVerifier};
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::ServerResult;
use crate::gateway::SyncGateway;
use axum::Router;
use crfs_store::{
    BlobStore, Directory, FileBlobStore, JournalOperationLog, MemoryBlobStore, OperationLog,
    BLOB_DIR, DIRECTORY_FILE, OPLOG_DIR,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// The sync server.
///
/// Opens the stores named by the configuration and serves them over HTTP.
///
/// # Example
///
/// ```
/// use crfs_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default()).unwrap();
/// let router = server.router();
/// # drop(router);
/// ```
pub struct SyncServer {
    config: ServerConfig,
    directory: Arc<Directory>,
    gateway: Arc<SyncGateway>,
}

impl SyncServer {
    /// Creates a server, opening persistent stores under
    /// `config.data_dir` or in-memory ones when it is unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a store cannot be opened.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let directory: Arc<Directory>;
        let oplog: Arc<dyn OperationLog>;
        let blobs: Arc<dyn BlobStore>;

        match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                info!(data_dir = %dir.display(), "opening stores");
                directory = Arc::new(Directory::open(dir.join(DIRECTORY_FILE))?);
                oplog = Arc::new(
                    JournalOperationLog::open(dir.join(OPLOG_DIR), config.sync_on_write)?
                        .with_max_open(config.max_open_journals),
                );
                blobs = Arc::new(
                    FileBlobStore::open(dir.join(BLOB_DIR))?
                        .with_verification(config.verify_digests),
                );
            }
            None => {
                info!("using in-memory stores");
                directory = Arc::new(Directory::in_memory());
                oplog = Arc::new(JournalOperationLog::in_memory());
                blobs = Arc::new(MemoryBlobStore::new().with_verification(config.verify_digests));
            }
        }

        Ok(Self::with_stores(config, directory, oplog, blobs))
    }

    /// Creates a server over existing stores.
    pub fn with_stores(
        config: ServerConfig,
        directory: Arc<Directory>,
        oplog: Arc<dyn OperationLog>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let verifier: Arc<dyn IdentityVerifier> = match &config.auth_secret {
            Some(secret) => Arc::new(TokenVerifier::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            None => Arc::new(ClaimedIdentity),
        };

        let gateway = Arc::new(SyncGateway::new(
            config.clone(),
            directory.clone(),
            directory.clone(),
            oplog,
            blobs,
            verifier,
        ));

        Self {
            config,
            directory,
            gateway,
        }
    }

    /// Returns the gateway.
    pub fn gateway(&self) -> &Arc<SyncGateway> {
        &self.gateway
    }

    /// Returns the identity directory.
    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// Returns a dispatcher for request envelopes.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.gateway))
    }

    /// Returns the HTTP router.
    pub fn router(&self) -> Router {
        crate::http::router(Arc::clone(&self.gateway))
    }

    /// Serves until the process is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn serve(self) -> ServerResult<()> {
        self.serve_with_shutdown(std::future::pending::<()>()).await
    }

    /// Serves until `signal` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %listener.local_addr()?, "listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await?;
        info!("server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Caller;
    use crfs_protocol::{FileSystemId, OpHash, UserId};
    use crfs_store::UserRepo;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    #[test]
    fn in_memory_server() {
        let server = SyncServer::new(ServerConfig::default()).unwrap();
        let user = UserId::new();
        server.gateway().register_user(user, None).unwrap();
        assert!(server.directory().get_user(user).unwrap().is_some());
    }

    #[test]
    fn persistent_server_survives_restart() {
        let dir = tempdir().unwrap();
        let config = ServerConfig::default().with_data_dir(dir.path());
        let user = UserId::new();
        let fs = FileSystemId::new();
        let hash = OpHash::digest(b"op");

        {
            let server = SyncServer::new(config.clone()).unwrap();
            let gateway = server.gateway();
            let caller = Caller::new(user);
            gateway.register_user(user, None).unwrap();
            gateway.register_fs(&caller, fs, None, BTreeSet::new()).unwrap();
            gateway.put_blob(Some(&caller), fs, &hash, b"op").unwrap();
            gateway.push_state(&caller, fs, &[hash.clone()]).unwrap();
        }

        let server = SyncServer::new(config).unwrap();
        let caller = Caller::new(user);
        let state = server.gateway().fetch_state(&caller, fs).unwrap();
        assert!(state.contains(&hash));
        assert_eq!(
            server.gateway().get_blob(Some(&caller), fs, &hash).unwrap(),
            b"op"
        );
    }

    #[test]
    fn auth_secret_enables_tokens() {
        let server = SyncServer::new(ServerConfig::default().with_auth(b"secret".to_vec())).unwrap();
        let user = UserId::new();
        let fs = FileSystemId::new();
        server.gateway().register_user(user, None).unwrap();

        let err = server
            .gateway()
            .register_fs(&Caller::new(user), fs, None, BTreeSet::new())
            .unwrap_err();
        assert_eq!(err.code().as_u32(), 9);

        let token = TokenVerifier::new(AuthConfig::new(b"secret".to_vec()))
            .create_token(user, fs)
            .unwrap();
        let caller = Caller::new(user).with_token(token);
        assert!(server
            .gateway()
            .register_fs(&caller, fs, None, BTreeSet::new())
            .is_ok());
    }
}
