//! Signal Service
//!
//! Entry point for the signalling relay.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use signal_service::actors::RoomDirectoryHandle;
use signal_service::config::Config;
use signal_service::crypto::CredentialStore;
use signal_service::observability::init_tracing;
use signal_service::repositories::{InMemorySessionStore, PgSessionStore, SessionStore};
use signal_service::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    init_tracing(config.log_format);

    info!("Starting Signal Service");
    info!(
        bind_address = %config.bind_address,
        token_strategy = ?config.token_strategy,
        outbound_queue_capacity = config.outbound_queue_capacity,
        slow_peer_strikes = config.slow_peer_strikes,
        announce_joins = config.announce_joins,
        "Configuration loaded successfully"
    );

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let store: Arc<dyn SessionStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .min_connections(2)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
                .connect(&add_query_timeout(url, 5))
                .await
                .map_err(|e| {
                    error!("Failed to connect to database: {}", e);
                    e
                })?;

            let store = PgSessionStore::new(pool);
            store.migrate().await.context("failed to run migrations")?;
            info!("Database connection established");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, sessions are kept in memory and lost on restart");
            Arc::new(InMemorySessionStore::new())
        }
    };

    let credentials =
        CredentialStore::new(config.bcrypt_cost).context("failed to initialize credentials")?;

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let drain = Duration::from_secs(config.drain_seconds);

    let state = Arc::new(AppState::new(config, store, credentials));
    let directory = state.directory.clone();
    let app = routes::build_routes(state, metrics_handle);

    info!("Signal Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(directory, drain))
    .await?;

    info!("Signal Service shutdown complete");

    Ok(())
}

/// Waits for SIGINT or SIGTERM, closes every room, then drains.
async fn shutdown_signal(directory: RoomDirectoryHandle, drain: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    // Rooms and relay connections share the directory's token.
    directory.cancel();

    if drain.is_zero() {
        info!("Skipping drain period (DRAIN_SECONDS=0)");
    } else {
        warn!("Draining connections for {} seconds...", drain.as_secs());
        tokio::time::sleep(drain).await;
        info!("Drain period complete");
    }
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
