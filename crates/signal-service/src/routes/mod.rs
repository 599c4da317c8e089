//! HTTP routes for the signal service.
//!
//! Defines the Axum router and application state.

use crate::actors::{ActorMetrics, RoomDirectoryHandle, RoomSettings};
use crate::config::Config;
use crate::crypto::{token_generator, CredentialStore};
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::repositories::SessionStore;
use crate::services::SessionRegistry;
use crate::signaling::RelayHub;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Session records and join authorization.
    pub registry: SessionRegistry,

    /// Live rooms.
    pub directory: RoomDirectoryHandle,

    /// Relay connection read loops.
    pub hub: RelayHub,

    /// Actor counters.
    pub metrics: Arc<ActorMetrics>,
}

impl AppState {
    /// Wire the registry and the relay together.
    ///
    /// Spawns the room directory, so it must run inside a Tokio runtime.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn SessionStore>, credentials: CredentialStore) -> Self {
        let registry = SessionRegistry::new(
            store,
            credentials,
            token_generator(config.token_strategy),
            config.min_password_length,
        );

        let metrics = ActorMetrics::new();
        let directory = RoomDirectoryHandle::new(
            RoomSettings {
                slow_peer_strikes: config.slow_peer_strikes,
                announce_joins: config.announce_joins,
            },
            Arc::clone(&metrics),
        );
        let hub = RelayHub::new(
            directory.clone(),
            config.outbound_queue_capacity,
            Arc::clone(&metrics),
        );

        Self {
            config,
            registry,
            directory,
            hub,
            metrics,
        }
    }
}

/// Build the application routes.
///
/// - `POST /session` - create a room
/// - `GET /connect?url=` - check a room handle
/// - `POST /connect/:handle` - join: password in, connect target out
/// - `GET /ws/:target` - relay websocket
/// - `/health`, `/ready`, `/metrics` - operational endpoints
///
/// The timeout bounds request/response handling; an upgraded websocket
/// runs outside it.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/session", post(handlers::create_session))
        .route("/connect", get(handlers::lookup_session))
        .route("/connect/:handle", post(handlers::join_session))
        .route("/ws/:target", get(handlers::relay_upgrade))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees framework rejections too)
    api_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
