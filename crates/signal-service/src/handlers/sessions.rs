//! Session API handlers.
//!
//! - `POST /session` - create a password-protected room
//! - `GET /connect?url=<roomHandle>` - check whether a room handle exists
//! - `POST /connect/:handle` - check the password and hand out the connect target
//!
//! A failed join looks the same on the wire whether the handle was unknown
//! or the password was wrong.

use crate::errors::SignalError;
use crate::models::{
    CreateSessionRequest, CreateSessionResponse, JoinSessionRequest, JoinSessionResponse,
    LookupQuery, LookupResponse,
};
use crate::routes::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use common::types::RoomHandle;
use std::sync::Arc;
use tracing::{debug, instrument};

const SOCKET_NOT_FOUND: &str = "Socket connection not found.";

/// Handler for POST /session
#[instrument(skip_all, name = "sig.handlers.create_session")]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Json<CreateSessionResponse>, SignalError> {
    let Json(request) = body.map_err(|e| SignalError::Validation(e.body_text()))?;

    let created = state
        .registry
        .create_session(&request.host, &request.title, request.password)
        .await?;

    debug!(
        target: "sig.handlers.sessions",
        session_id = %created.session_id,
        "Create session request completed"
    );

    Ok(Json(CreateSessionResponse {
        room_handle: created.room_handle,
        connect_target: created.connect_target,
    }))
}

/// Handler for POST /connect/:handle
#[instrument(skip_all, name = "sig.handlers.join_session")]
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
    body: Result<Json<JoinSessionRequest>, JsonRejection>,
) -> Result<Json<JoinSessionResponse>, SignalError> {
    let Json(request) = body.map_err(|e| SignalError::Validation(e.body_text()))?;

    let grant = state
        .registry
        .resolve_and_authorize(&RoomHandle::new(handle), request.password)
        .await
        .map_err(SignalError::into_join_failure)?;

    Ok(Json(JoinSessionResponse {
        title: grant.title,
        connect_target: grant.connect_target,
    }))
}

/// Handler for GET /connect
#[instrument(skip_all, name = "sig.handlers.lookup_session")]
pub async fn lookup_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<LookupResponse>, SignalError> {
    let handle = query
        .url
        .filter(|url| !url.is_empty())
        .map(RoomHandle::new)
        .ok_or_else(socket_not_found)?;

    if state.registry.exists(&handle).await? {
        Ok(Json(LookupResponse { exists: true }))
    } else {
        Err(socket_not_found())
    }
}

fn socket_not_found() -> SignalError {
    SignalError::BadRequest(SOCKET_NOT_FOUND.to_string())
}
