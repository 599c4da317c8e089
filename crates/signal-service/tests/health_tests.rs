//! Operational endpoint integration tests.
//!
//! Covers `/health`, `/ready` and `/metrics` against a real listener.

use signal_test_utils::{SessionClient, TestSignalServer};

#[tokio::test]
async fn test_health_endpoint_returns_200() -> Result<(), anyhow::Error> {
    let server = TestSignalServer::spawn().await?;
    let client = SessionClient::new(server.url());

    let (status, body) = client.get("/health").await?;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "signal-service");

    Ok(())
}

#[tokio::test]
async fn test_health_reports_configured_service_name() -> Result<(), anyhow::Error> {
    let server = TestSignalServer::spawn_with(&[("SERVICE_NAME", "signalling-server")]).await?;
    let client = SessionClient::new(server.url());

    let (_, body) = client.get("/health").await?;

    assert_eq!(body["service"], "signalling-server");

    Ok(())
}

#[tokio::test]
async fn test_health_endpoint_returns_json() -> Result<(), anyhow::Error> {
    let server = TestSignalServer::spawn().await?;

    let response = reqwest::get(format!("{}/health", server.url())).await?;

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.contains("application/json"));

    Ok(())
}

#[tokio::test]
async fn test_ready_reports_room_count() -> Result<(), anyhow::Error> {
    let server = TestSignalServer::spawn().await?;
    let client = SessionClient::new(server.url());

    let (status, body) = client.get("/ready").await?;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["store"], "healthy");
    assert_eq!(body["rooms"], 0);

    Ok(())
}

#[tokio::test]
async fn test_ready_reports_draining_after_shutdown() -> Result<(), anyhow::Error> {
    let server = TestSignalServer::spawn().await?;
    let client = SessionClient::new(server.url());

    server.directory().cancel();

    let (status, body) = client.get("/ready").await?;
    assert_eq!(status, 503);
    assert_eq!(body["status"], "draining");

    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_is_served() -> Result<(), anyhow::Error> {
    let server = TestSignalServer::spawn().await?;

    let response = reqwest::get(format!("{}/metrics", server.url())).await?;

    assert_eq!(response.status(), 200);

    Ok(())
}
