//! Request and reply payloads.

use crate::code::ResponseCode;
use crate::hash::OpHash;
use crate::ids::{FileSystemId, UserId};
use serde::{Deserialize, Serialize};

/// `register_user` request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    /// User to create or update.
    pub user_uuid: UserId,
    /// New display name; absent clears it.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// `check_user` request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckUserRequest {
    /// User to look up.
    pub user_uuid: UserId,
}

/// Reply to `register_user` and `check_user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReply {
    /// Result code.
    pub code: ResponseCode,
    /// The user.
    pub user_uuid: UserId,
    /// The stored display name.
    pub display_name: Option<String>,
}

/// `register_fs` request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterFsRequest {
    /// Owning user (must already be registered).
    pub user_uuid: UserId,
    /// Filesystem to create or update.
    pub fs_uuid: FileSystemId,
    /// New display name; absent clears it.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Filesystem option tokens.
    #[serde(default)]
    pub fs_opts: Vec<String>,
    /// Hex access token, when the server verifies tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// `check_fs` request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckFsRequest {
    /// Claimed owner.
    pub user_uuid: UserId,
    /// Filesystem to look up.
    pub fs_uuid: FileSystemId,
    /// Hex access token, when the server verifies tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Reply to `register_fs` and `check_fs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSystemReply {
    /// Result code.
    pub code: ResponseCode,
    /// Owner.
    pub user_uuid: UserId,
    /// The filesystem.
    pub fs_uuid: FileSystemId,
    /// The stored display name.
    pub display_name: Option<String>,
    /// Option tokens; only reported by `check_fs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_opts: Option<Vec<String>>,
}

/// `fetch_state` request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchStateRequest {
    /// Claimed owner.
    pub user_uuid: UserId,
    /// Filesystem whose log is requested.
    pub fs_uuid: FileSystemId,
    /// Hex access token, when the server verifies tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Reply to `fetch_state`.
///
/// `state` holds every known hash exactly once, in no particular order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchStateReply {
    /// Result code.
    pub code: ResponseCode,
    /// Known operation hashes.
    pub state: Vec<OpHash>,
}

/// `push_state` request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushStateRequest {
    /// Claimed owner.
    pub user_uuid: UserId,
    /// Filesystem whose log is extended.
    pub fs_uuid: FileSystemId,
    /// Hashes to register, applied in order.
    pub ops: Vec<OpHash>,
    /// Hex access token, when the server verifies tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Reply to `push_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushStateReply {
    /// Result code.
    pub code: ResponseCode,
}

/// Payload of any failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Failure code.
    pub code: ResponseCode,
    /// Human-readable reason, safe to show to clients.
    pub err_msg: String,
}

impl ErrorReply {
    /// Creates an error payload.
    pub fn new(code: ResponseCode, err_msg: impl Into<String>) -> Self {
        Self {
            code,
            err_msg: err_msg.into(),
        }
    }
}
