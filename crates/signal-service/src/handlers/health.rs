//! Liveness and readiness endpoints.

use crate::models::{HealthResponse, ReadinessResponse};
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Handler for GET /health
///
/// Always 200 while the process is serving.
#[instrument(skip_all, name = "sig.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
    })
}

/// Handler for GET /ready
///
/// 200 when the session store answers and the relay is accepting rooms,
/// 503 otherwise (including while draining for shutdown).
///
/// ```json
/// { "status": "ready", "store": "healthy", "rooms": 3 }
/// ```
#[instrument(skip_all, name = "sig.health.ready")]
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    if let Err(e) = state.registry.ping().await {
        warn!(target: "sig.handlers.health", error = %e, "Readiness check failed: store unreachable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready".to_string(),
                store: "unhealthy".to_string(),
                rooms: None,
            }),
        );
    }

    let status = if state.directory.is_cancelled() {
        None
    } else {
        state.directory.status().await.ok()
    };

    match status {
        Some(status) if !status.is_shutting_down => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".to_string(),
                store: "healthy".to_string(),
                rooms: Some(status.room_count),
            }),
        ),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "draining".to_string(),
                store: "healthy".to_string(),
                rooms: None,
            }),
        ),
    }
}
