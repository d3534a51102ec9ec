//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A hash string was not valid lowercase/uppercase hex of even length.
    #[error("invalid hex hash: {0}")]
    InvalidHex(String),

    /// A hash had an unacceptable length.
    #[error("invalid hash length: {0} bytes")]
    InvalidHashLength(usize),

    /// A mandatory envelope or payload field was absent.
    #[error("missing field \"{0}\"")]
    MissingField(&'static str),

    /// The message type is not one the server understands.
    #[error("unrecognised type <{0}>")]
    UnknownType(String),

    /// Any other structural problem.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}
