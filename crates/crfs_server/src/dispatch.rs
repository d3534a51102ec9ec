//! Envelope decoding and routing.

use crate::auth::Caller;
use crate::error::{ServerError, ServerResult};
use crate::gateway::SyncGateway;
use axum::http::StatusCode;
use crfs_protocol::{
    CheckFsRequest, CheckUserRequest, ErrorReply, FetchStateReply, FetchStateRequest,
    FileSystemReply, MessageType, ProtocolError, PushStateReply, PushStateRequest,
    RegisterFsRequest, RegisterUserRequest, Reply, Request, ResponseCode, UserReply,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// Turns request envelopes into reply envelopes.
#[derive(Clone)]
pub struct Dispatcher {
    gateway: Arc<SyncGateway>,
}

impl Dispatcher {
    /// Creates a dispatcher over `gateway`.
    pub fn new(gateway: Arc<SyncGateway>) -> Self {
        Self { gateway }
    }

    /// Handles a raw request body.
    pub fn handle_bytes(&self, body: &[u8]) -> (StatusCode, Reply) {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => self.handle(&value),
            Err(e) => {
                debug!(error = %e, "request body is not JSON");
                let err = ServerError::from(ProtocolError::from(e));
                (err.status(), error_reply(Value::Null, "", &err))
            }
        }
    }

    /// Handles a decoded request document.
    ///
    /// The transaction id and type are echoed back whenever they can be
    /// read, including on failure.
    pub fn handle(&self, value: &Value) -> (StatusCode, Reply) {
        let request = match Request::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                let transaction_id = value.get("transaction_id").cloned().unwrap_or(Value::Null);
                let message_type = value.get("type").and_then(Value::as_str).unwrap_or_default();
                let err = ServerError::from(e);
                debug!(error = %err, "rejected envelope");
                return (err.status(), error_reply(transaction_id, message_type, &err));
            }
        };

        match self.route(&request) {
            Ok(payload) => (
                StatusCode::OK,
                Reply::new(request.transaction_id, request.message_type, payload),
            ),
            Err(err) => {
                if err.is_server_error() {
                    error!(kind = %request.message_type, error = %err, "request failed");
                } else {
                    debug!(kind = %request.message_type, error = %err, "request rejected");
                }
                (
                    err.status(),
                    error_reply(request.transaction_id, &request.message_type, &err),
                )
            }
        }
    }

    fn route(&self, request: &Request) -> ServerResult<Value> {
        let gateway = &self.gateway;
        match request.kind()? {
            MessageType::Ping => Ok(Value::Object(Default::default())),
            MessageType::RegisterUser => {
                let p: RegisterUserRequest = request.decode_payload()?;
                let user = gateway.register_user(p.user_uuid, p.display_name)?;
                encode(&UserReply {
                    code: ResponseCode::Success,
                    user_uuid: user.id,
                    display_name: user.display_name,
                })
            }
            MessageType::CheckUser => {
                let p: CheckUserRequest = request.decode_payload()?;
                let user = gateway.check_user(p.user_uuid)?;
                encode(&UserReply {
                    code: ResponseCode::Success,
                    user_uuid: user.id,
                    display_name: user.display_name,
                })
            }
            MessageType::RegisterFs => {
                let p: RegisterFsRequest = request.decode_payload()?;
                let caller = Caller::from_hex_token(p.user_uuid, p.token.as_deref())?;
                let options = p.fs_opts.into_iter().collect();
                let fs = gateway.register_fs(&caller, p.fs_uuid, p.display_name, options)?;
                encode(&FileSystemReply {
                    code: ResponseCode::Success,
                    user_uuid: fs.owner,
                    fs_uuid: fs.id,
                    display_name: fs.display_name,
                    fs_opts: None,
                })
            }
            MessageType::CheckFs => {
                let p: CheckFsRequest = request.decode_payload()?;
                let caller = Caller::from_hex_token(p.user_uuid, p.token.as_deref())?;
                let fs = gateway.check_fs(&caller, p.fs_uuid)?;
                encode(&FileSystemReply {
                    code: ResponseCode::Success,
                    user_uuid: fs.owner,
                    fs_uuid: fs.id,
                    display_name: fs.display_name,
                    fs_opts: Some(fs.options.into_iter().collect()),
                })
            }
            MessageType::FetchState => {
                let p: FetchStateRequest = request.decode_payload()?;
                let caller = Caller::from_hex_token(p.user_uuid, p.token.as_deref())?;
                let state = gateway.fetch_state(&caller, p.fs_uuid)?;
                encode(&FetchStateReply {
                    code: ResponseCode::Success,
                    state: state.into_iter().collect(),
                })
            }
            MessageType::PushState => {
                let p: PushStateRequest = request.decode_payload()?;
                let caller = Caller::from_hex_token(p.user_uuid, p.token.as_deref())?;
                gateway.push_state(&caller, p.fs_uuid, &p.ops)?;
                encode(&PushStateReply {
                    code: ResponseCode::Success,
                })
            }
        }
    }
}

fn encode<T: Serialize>(payload: &T) -> ServerResult<Value> {
    serde_json::to_value(payload).map_err(|e| ServerError::Internal(e.to_string()))
}

fn error_reply(transaction_id: Value, message_type: &str, err: &ServerError) -> Reply {
    let payload = ErrorReply::new(err.code(), err.public_message());
    let payload = serde_json::to_value(payload).unwrap_or(Value::Null);
    Reply::new(transaction_id, message_type, payload)
}
