//! Request/response bodies and persisted session records.

use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::types::{ConnectTarget, RoomHandle, SessionId};
use serde::{Deserialize, Serialize};

/// Persisted identity of a room plus its token pair.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: SessionId,
    /// Opaque identity string of the creator.
    pub host: String,
    pub title: String,
    /// bcrypt hash; the clear password is never stored.
    pub password_hash: String,
    pub room_handle: RoomHandle,
    pub connect_target: ConnectTarget,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting a session and its token pair.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub host: String,
    pub title: String,
    pub password_hash: String,
    pub room_handle: RoomHandle,
    pub connect_target: ConnectTarget,
}

/// Body of `POST /session`.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub host: String,
    pub title: String,
    pub password: SecretString,
}

/// Response of `POST /session`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub room_handle: RoomHandle,
    pub connect_target: ConnectTarget,
}

/// Body of `POST /connect/:handle`.
#[derive(Debug, Deserialize)]
pub struct JoinSessionRequest {
    pub password: SecretString,
}

/// Response of `POST /connect/:handle`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionResponse {
    pub title: String,
    pub connect_target: ConnectTarget,
}

/// Query string of `GET /connect`.
#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub url: Option<String>,
}

/// Response of `GET /connect`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LookupResponse {
    pub exists: bool,
}

/// Liveness response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// Readiness response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rooms: Option<usize>,
}
