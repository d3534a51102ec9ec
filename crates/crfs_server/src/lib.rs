//! # CRFS Sync Server
//!
//! HTTP sync server for CRFS replicas.
//!
//! This crate provides:
//! - [`SyncGateway`]: `fetch_state`/`push_state` and blob access, with an
//!   ownership check on every call
//! - [`Dispatcher`]: JSON envelope decoding and routing
//! - HTTP routes (axum) for the envelope endpoint and the blob endpoint
//! - Optional token authentication (HMAC-SHA256)
//!
//! # Protocol
//!
//! A replica reconciles with the server in four steps:
//! 1. `fetch_state` returns every operation hash the server knows
//! 2. The replica downloads the blobs it lacks (`GET /operation/...`)
//! 3. It uploads the blobs only it has (`PUT /operation/...`)
//! 4. `push_state` registers the uploaded hashes
//!
//! # Authentication
//!
//! By default the claimed `user_uuid` is trusted. With a secret
//! configured, every filesystem-scoped request must carry a token:
//!
//! ```rust,ignore
//! use crfs_server::{AuthConfig, ServerConfig, TokenVerifier};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let config = ServerConfig::default().with_auth(secret.clone());
//!
//! let verifier = TokenVerifier::new(AuthConfig::new(secret));
//! let token = verifier.create_token(user_id, fs_id)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod dispatch;
mod error;
mod gateway;
pub mod http;
mod server;

pub use auth::{AuthConfig, Caller, ClaimedIdentity, IdentityVerifier, TokenVerifier};
pub use config::ServerConfig;
pub use dispatch::Dispatcher;
pub use error::{ServerError, ServerResult};
pub use gateway::SyncGateway;
pub use server::SyncServer;
