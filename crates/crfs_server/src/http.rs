//! HTTP routes.
//!
//! - `POST /api/` takes a JSON request envelope and returns a reply
//!   envelope.
//! - `GET` and `PUT` on `/operation/<fs-uuid>/<hex-hash>` read and write
//!   raw operation bytes.

use crate::auth::Caller;
use crate::dispatch::Dispatcher;
use crate::error::{ServerError, ServerResult};
use crate::gateway::SyncGateway;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use crfs_protocol::{FileSystemId, OpHash, UserId};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Header carrying the caller's user id on blob requests.
pub const USER_HEADER: &str = "x-crfs-user";

/// Header carrying the caller's hex token on blob requests.
pub const TOKEN_HEADER: &str = "x-crfs-token";

const API_BODY_LIMIT: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    gateway: Arc<SyncGateway>,
    dispatcher: Dispatcher,
}

/// Builds the router for `gateway`.
pub fn router(gateway: Arc<SyncGateway>) -> Router {
    let blob_limit = gateway.config().max_blob_size;
    let state = AppState {
        dispatcher: Dispatcher::new(Arc::clone(&gateway)),
        gateway,
    };

    Router::new()
        .route("/api/", post(api))
        .route("/api", post(api))
        .route("/operation/:fs/:hash", get(get_blob).put(put_blob))
        .layer(DefaultBodyLimit::max(blob_limit.max(API_BODY_LIMIT)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn api(State(state): State<AppState>, body: Bytes) -> Response {
    let dispatcher = state.dispatcher.clone();
    match tokio::task::spawn_blocking(move || dispatcher.handle_bytes(&body)).await {
        Ok((status, reply)) => (status, Json(reply)).into_response(),
        Err(e) => {
            error!(error = %e, "dispatch task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_blob(
    State(state): State<AppState>,
    Path((fs, hash)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let result = run_blocking(move || {
        let (fs, hash) = parse_address(&fs, &hash)?;
        let caller = caller_from_headers(&headers)?;
        state.gateway.get_blob(caller.as_ref(), fs, &hash)
    })
    .await;

    match result {
        Ok(data) => ([(header::CONTENT_TYPE, "application/octet-stream")], data).into_response(),
        Err(err) => blob_error(&err),
    }
}

async fn put_blob(
    State(state): State<AppState>,
    Path((fs, hash)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = run_blocking(move || {
        let (fs, hash) = parse_address(&fs, &hash)?;
        let caller = caller_from_headers(&headers)?;
        state.gateway.put_blob(caller.as_ref(), fs, &hash, &body)
    })
    .await;

    match result {
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => blob_error(&err),
    }
}

async fn run_blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?
}

fn parse_address(fs: &str, hash: &str) -> ServerResult<(FileSystemId, OpHash)> {
    let fs = fs
        .parse()
        .map_err(|e| ServerError::MalformedInput(format!("filesystem id: {e}")))?;
    let hash = OpHash::from_hex(hash)?;
    Ok((fs, hash))
}

fn caller_from_headers(headers: &HeaderMap) -> ServerResult<Option<Caller>> {
    let Some(user) = headers.get(USER_HEADER) else {
        return Ok(None);
    };
    let user: UserId = user
        .to_str()
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ServerError::MalformedInput(format!("invalid {USER_HEADER} header")))?;
    let token = headers
        .get(TOKEN_HEADER)
        .map(|t| {
            t.to_str()
                .map_err(|_| ServerError::MalformedInput(format!("invalid {TOKEN_HEADER} header")))
        })
        .transpose()?;
    Caller::from_hex_token(user, token).map(Some)
}

fn blob_error(err: &ServerError) -> Response {
    if err.is_server_error() {
        error!(error = %err, "blob request failed");
    }
    (err.blob_status(), err.public_message()).into_response()
}
