//! Typed wrappers over the session HTTP API.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

/// Room created through `POST /session`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRoom {
    pub room_handle: String,
    pub connect_target: String,
}

/// Successful `POST /connect/:handle` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoom {
    pub title: String,
    pub connect_target: String,
}

/// HTTP client bound to one server base URL.
#[derive(Debug, Clone)]
pub struct SessionClient {
    base_url: String,
    http: reqwest::Client,
}

impl SessionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Create a room, failing the test on any non-200 response.
    pub async fn create_room(
        &self,
        host: &str,
        title: &str,
        password: &str,
    ) -> Result<CreatedRoom, anyhow::Error> {
        let (status, body) = self
            .create_room_raw(&json!({"host": host, "title": title, "password": password}))
            .await?;
        anyhow::ensure!(status == StatusCode::OK, "create failed: {} {}", status, body);
        Ok(serde_json::from_value(body)?)
    }

    /// `POST /session` with an arbitrary body.
    pub async fn create_room_raw(&self, body: &Value) -> Result<(StatusCode, Value), anyhow::Error> {
        let response = self
            .http
            .post(format!("{}/session", self.base_url))
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    /// Join a room, failing the test on any non-200 response.
    pub async fn join(&self, room_handle: &str, password: &str) -> Result<JoinedRoom, anyhow::Error> {
        let (status, body) = self.join_raw(room_handle, password).await?;
        anyhow::ensure!(status == StatusCode::OK, "join failed: {} {}", status, body);
        Ok(serde_json::from_value(body)?)
    }

    /// `POST /connect/:handle`, returning status and body as-is.
    pub async fn join_raw(
        &self,
        room_handle: &str,
        password: &str,
    ) -> Result<(StatusCode, Value), anyhow::Error> {
        let response = self
            .http
            .post(format!("{}/connect/{}", self.base_url, room_handle))
            .json(&json!({ "password": password }))
            .send()
            .await?;
        read_json(response).await
    }

    /// `GET /connect?url=`.
    pub async fn lookup(&self, room_handle: &str) -> Result<(StatusCode, Value), anyhow::Error> {
        let response = self
            .http
            .get(format!("{}/connect", self.base_url))
            .query(&[("url", room_handle)])
            .send()
            .await?;
        read_json(response).await
    }

    /// `GET` any path, returning status and JSON body (`Null` if not JSON).
    pub async fn get(&self, path: &str) -> Result<(StatusCode, Value), anyhow::Error> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<(StatusCode, Value), anyhow::Error> {
    let status = response.status();
    let bytes = response.bytes().await?;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, body))
}
