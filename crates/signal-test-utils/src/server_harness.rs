//! Test server harness for E2E testing
//!
//! Provides `TestSignalServer` for spawning real signal service instances
//! in tests.

use metrics_exporter_prometheus::PrometheusBuilder;
use signal_service::actors::RoomDirectoryHandle;
use signal_service::config::Config;
use signal_service::crypto::{CredentialStore, MIN_BCRYPT_COST};
use signal_service::repositories::InMemorySessionStore;
use signal_service::routes::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the signal service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestSignalServer::spawn().await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestSignalServer {
    addr: SocketAddr,
    config: Config,
    directory: RoomDirectoryHandle,
    _handle: JoinHandle<()>,
}

impl TestSignalServer {
    /// Spawn a server with default configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[]).await
    }

    /// Spawn a server with configuration overrides, e.g.
    /// `[("ANNOUNCE_JOINS", "true")]`.
    ///
    /// The server will:
    /// - Use the in-memory session store and the lowest bcrypt cost
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string())]);
        for (key, value) in overrides {
            vars.insert((*key).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let credentials = CredentialStore::new(MIN_BCRYPT_COST)
            .map_err(|e| anyhow::anyhow!("Failed to create credential store: {}", e))?;

        let state = AppState::new(
            config.clone(),
            Arc::new(InMemorySessionStore::new()),
            credentials,
        );
        let directory = state.directory.clone();

        // Recorder is never installed globally; the handle only renders /metrics
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(Arc::new(state), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            directory,
            _handle: handle,
        })
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Relay websocket URL for a connect target.
    pub fn ws_url(&self, connect_target: &str) -> String {
        format!("ws://{}/ws/{}", self.addr, connect_target)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The live room directory, for membership assertions.
    pub fn directory(&self) -> &RoomDirectoryHandle {
        &self.directory
    }
}

impl Drop for TestSignalServer {
    fn drop(&mut self) {
        self.directory.cancel();
        self._handle.abort();
    }
}
