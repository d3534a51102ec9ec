//! The JSON message envelope.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Protocol version reported in every reply.
pub const PROTOCOL_VERSION: &str = "0.0.1";

/// Message types the server routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Liveness check.
    Ping,
    /// Create or update a user.
    RegisterUser,
    /// Look up a user.
    CheckUser,
    /// Create or update a filesystem.
    RegisterFs,
    /// Look up a filesystem.
    CheckFs,
    /// Read the operation log of a filesystem.
    FetchState,
    /// Add hashes to the operation log of a filesystem.
    PushState,
}

impl MessageType {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageType::Ping => "ping",
            MessageType::RegisterUser => "register_user",
            MessageType::CheckUser => "check_user",
            MessageType::RegisterFs => "register_fs",
            MessageType::CheckFs => "check_fs",
            MessageType::FetchState => "fetch_state",
            MessageType::PushState => "push_state",
        }
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s {
            "ping" => Ok(MessageType::Ping),
            "register_user" => Ok(MessageType::RegisterUser),
            "check_user" => Ok(MessageType::CheckUser),
            "register_fs" => Ok(MessageType::RegisterFs),
            "check_fs" => Ok(MessageType::CheckFs),
            "fetch_state" => Ok(MessageType::FetchState),
            "push_state" => Ok(MessageType::PushState),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incoming request envelope.
///
/// `transaction_id` is echoed back untouched; replicas send it either as a
/// string or as an integer, so it is kept as a raw JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-chosen correlation id.
    pub transaction_id: Value,
    /// Message type name.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Type-specific payload object.
    pub payload: Value,
}

impl Request {
    /// Creates a request envelope.
    pub fn new(transaction_id: impl Into<Value>, message_type: MessageType, payload: Value) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            message_type: message_type.as_str().to_string(),
            payload,
        }
    }

    /// Extracts the envelope fields from a decoded JSON document.
    ///
    /// Fields are checked in the order `transaction_id`, `type`, `payload`
    /// and the first missing one is reported.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingField`] if a mandatory field is
    /// absent, or [`ProtocolError::Malformed`] if `type` is not a string.
    pub fn from_value(value: &Value) -> ProtocolResult<Self> {
        let transaction_id = value
            .get("transaction_id")
            .cloned()
            .ok_or(ProtocolError::MissingField("transaction_id"))?;
        let message_type = value
            .get("type")
            .ok_or(ProtocolError::MissingField("type"))?
            .as_str()
            .ok_or_else(|| ProtocolError::Malformed("\"type\" must be a string".into()))?
            .to_string();
        let payload = value
            .get("payload")
            .cloned()
            .ok_or(ProtocolError::MissingField("payload"))?;

        Ok(Self {
            transaction_id,
            message_type,
            payload,
        })
    }

    /// Resolves the message type.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownType`] for unrouted types.
    pub fn kind(&self) -> ProtocolResult<MessageType> {
        self.message_type.parse()
    }

    /// Decodes the payload into a typed request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the payload does not match.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(T::deserialize(&self.payload)?)
    }
}

/// An outgoing reply envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Server protocol version.
    pub version: String,
    /// Echo of the request's transaction id.
    pub transaction_id: Value,
    /// Always true for replies.
    pub reply: bool,
    /// Echo of the request's message type.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Type-specific reply payload.
    pub payload: Value,
    /// Reserved for server-initiated notices; always empty today.
    pub notifications: Vec<Value>,
}

impl Reply {
    /// Wraps a payload into a reply envelope.
    pub fn new(transaction_id: Value, message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            transaction_id,
            reply: true,
            message_type: message_type.into(),
            payload,
            notifications: Vec::new(),
        }
    }

    /// Reads the `code` field of the payload, if present.
    #[must_use]
    pub fn code(&self) -> Option<u32> {
        self.payload
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok())
    }
}
