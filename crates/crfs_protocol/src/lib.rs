//! # CRFS Sync Protocol
//!
//! Wire types for the CRFS sync server.
//!
//! This crate provides:
//! - [`OpHash`], the content address of an operation
//! - Identifier newtypes for users, filesystems and replicas
//! - [`ResponseCode`], the numeric result carried in every reply payload
//! - The JSON message envelope and the per-message payloads
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod code;
mod envelope;
mod error;
mod hash;
mod ids;
mod messages;

pub use code::ResponseCode;
pub use envelope::{MessageType, Reply, Request, PROTOCOL_VERSION};
pub use error::{ProtocolError, ProtocolResult};
pub use hash::OpHash;
pub use ids::{FileSystemId, ReplicaId, UserId};
pub use messages::{
    CheckFsRequest, CheckUserRequest, ErrorReply, FetchStateReply, FetchStateRequest,
    FileSystemReply, PushStateReply, PushStateRequest, RegisterFsRequest, RegisterUserRequest,
    UserReply,
};
