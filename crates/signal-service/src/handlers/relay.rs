//! Relay connection endpoint.
//!
//! `GET /ws/:target` upgrades to a websocket for a known connect target.
//! Unknown targets get 404 before any upgrade.

use crate::errors::SignalError;
use crate::routes::AppState;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use common::types::ConnectTarget;
use std::sync::Arc;
use tracing::instrument;

/// Largest accepted inbound frame.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Handler for GET /ws/:target
#[instrument(skip_all, name = "sig.handlers.relay_upgrade")]
pub async fn relay_upgrade(
    State(state): State<Arc<AppState>>,
    Path(target): Path<String>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let target = ConnectTarget::new(target);

    match state.registry.target_exists(&target).await {
        Ok(true) => {}
        Ok(false) => return SignalError::NotFound("Room not found".to_string()).into_response(),
        Err(e) => return e.into_response(),
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let hub = state.hub.clone();
    upgrade
        .max_message_size(MAX_FRAME_BYTES)
        .max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| async move { hub.serve(socket, target).await })
}
