//! Error types for the sync server.

use axum::http::StatusCode;
use crfs_protocol::{FileSystemId, OpHash, ProtocolError, ResponseCode, UserId};
use crfs_store::StoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The user is not registered.
    #[error("user doesn't exist: {0}")]
    UserNotFound(UserId),

    /// The filesystem is not registered.
    #[error("filesystem doesn't exist: {0}")]
    FileSystemNotFound(FileSystemId),

    /// The filesystem belongs to another user.
    #[error("filesystem {0} is owned by another user")]
    OwnershipMismatch(FileSystemId),

    /// The caller could not prove its identity.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid request format.
    #[error("malformed request: {0}")]
    MalformedInput(String),

    /// No blob stored at the address.
    #[error("no operation {hash} in filesystem {fs}")]
    BlobNotFound {
        /// Filesystem namespace.
        fs: FileSystemId,
        /// Requested hash.
        hash: OpHash,
    },

    /// Blob content disagrees with its address or with stored content.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// Uploaded blob exceeds the configured limit.
    #[error("blob of {size} bytes exceeds the {limit} byte limit")]
    TooLarge {
        /// Offered size.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the protocol response code for this error.
    pub fn code(&self) -> ResponseCode {
        match self {
            ServerError::UserNotFound(_) => ResponseCode::NoUser,
            ServerError::FileSystemNotFound(_) => ResponseCode::NoFileSystem,
            ServerError::OwnershipMismatch(_) | ServerError::AuthenticationFailed(_) => {
                ResponseCode::AuthError
            }
            ServerError::MalformedInput(_) | ServerError::TooLarge { .. } => {
                ResponseCode::Malformed
            }
            ServerError::BlobNotFound { .. } => ResponseCode::NotFound,
            ServerError::IntegrityViolation(_) => ResponseCode::Collision,
            ServerError::Io(_) | ServerError::Internal(_) => ResponseCode::Error,
        }
    }

    /// Returns the HTTP status used for enveloped replies.
    pub fn status(&self) -> StatusCode {
        if self.is_server_error() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::BAD_REQUEST
        }
    }

    /// Returns the HTTP status used on the blob routes.
    pub fn blob_status(&self) -> StatusCode {
        match self {
            ServerError::FileSystemNotFound(_) | ServerError::BlobNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ServerError::OwnershipMismatch(_) | ServerError::AuthenticationFailed(_) => {
                StatusCode::FORBIDDEN
            }
            ServerError::IntegrityViolation(_) => StatusCode::CONFLICT,
            ServerError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::UserNotFound(_) | ServerError::MalformedInput(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Io(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Io(_) | ServerError::Internal(_))
    }

    /// Returns the message that may be shown to the client.
    ///
    /// Server errors get a fixed text so that paths and OS error details
    /// stay in the server log.
    pub fn public_message(&self) -> String {
        if self.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserNotFound(user) => ServerError::UserNotFound(user),
            StoreError::FileSystemNotFound(fs) => ServerError::FileSystemNotFound(fs),
            StoreError::OwnershipMismatch { fs } => ServerError::OwnershipMismatch(fs),
            StoreError::BlobNotFound { fs, hash } => ServerError::BlobNotFound { fs, hash },
            e @ (StoreError::DigestMismatch { .. } | StoreError::ContentConflict { .. }) => {
                ServerError::IntegrityViolation(e.to_string())
            }
            StoreError::Io(e) => ServerError::Io(e),
            e @ (StoreError::Corrupted(_) | StoreError::Serialization(_)) => {
                ServerError::Internal(e.to_string())
            }
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::MalformedInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::MalformedInput("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::MalformedInput("bad".into()).is_server_error());
    }

    #[test]
    fn response_codes() {
        let fs = FileSystemId::new();
        assert_eq!(ServerError::UserNotFound(UserId::new()).code().as_u32(), 3);
        assert_eq!(ServerError::FileSystemNotFound(fs).code().as_u32(), 4);
        assert_eq!(ServerError::OwnershipMismatch(fs).code().as_u32(), 9);
        assert_eq!(ServerError::MalformedInput("x".into()).code().as_u32(), 8);
        assert_eq!(ServerError::IntegrityViolation("x".into()).code().as_u32(), 2);
    }

    #[test]
    fn server_errors_hide_details() {
        let err = ServerError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/var/lib/crfs/blobs/secret",
        ));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("/var/lib"));
    }

    #[test]
    fn store_errors_map() {
        let hash = OpHash::digest(b"x");
        let err: ServerError = StoreError::ContentConflict { hash }.into();
        assert!(matches!(err, ServerError::IntegrityViolation(_)));
        assert_eq!(err.blob_status(), StatusCode::CONFLICT);

        let err: ServerError = StoreError::corrupted("bad crc").into();
        assert!(err.is_server_error());
    }
}
