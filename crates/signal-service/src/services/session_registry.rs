//! Session registry: create rooms, resolve handles, authorize joins.
//!
//! The registry owns the validation rules for new sessions and the only
//! code path that compares a clear password against a stored hash. bcrypt
//! work runs on the blocking pool.

use crate::crypto::{CredentialStore, TokenGenerator};
use crate::errors::SignalError;
use crate::models::NewSession;
use crate::observability::metrics;
use crate::repositories::SessionStore;
use common::secret::{ExposeSecret, SecretString};
use common::types::{ConnectTarget, RoomHandle, SessionId};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Maximum length of `host` and `title`, in characters.
pub const MAX_FIELD_LENGTH: usize = 256;

/// bcrypt ignores input past this many bytes.
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Result of a successful session creation.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: SessionId,
    pub room_handle: RoomHandle,
    pub connect_target: ConnectTarget,
}

/// Result of a successful join: what the caller needs to open a relay connection.
#[derive(Debug, Clone)]
pub struct JoinGrant {
    pub title: String,
    pub room_handle: RoomHandle,
    pub connect_target: ConnectTarget,
}

/// Durable room records plus credential checks.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    credentials: CredentialStore,
    tokens: Arc<dyn TokenGenerator>,
    min_password_length: usize,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        credentials: CredentialStore,
        tokens: Arc<dyn TokenGenerator>,
        min_password_length: usize,
    ) -> Self {
        Self {
            store,
            credentials,
            tokens,
            min_password_length,
        }
    }

    /// Create a session and its token pair.
    ///
    /// Fails with `Validation` on empty or oversized fields, `Conflict` when
    /// the generated tokens are already taken, `Store` on persistence failure.
    #[instrument(skip_all, name = "sig.registry.create_session")]
    pub async fn create_session(
        &self,
        host: &str,
        title: &str,
        password: SecretString,
    ) -> Result<CreatedSession, SignalError> {
        validate_field("host", host)?;
        validate_field("title", title)?;
        self.validate_password(&password)?;

        let issued = self.tokens.issue(host, title, &password)?;

        let credentials = self.credentials.clone();
        let password_hash =
            tokio::task::spawn_blocking(move || credentials.hash_password(&password))
                .await
                .map_err(|e| SignalError::Internal(format!("hash task failed: {e}")))??;

        let record = self
            .store
            .insert_session(NewSession {
                host: host.to_string(),
                title: title.to_string(),
                password_hash,
                room_handle: issued.room_handle,
                connect_target: issued.connect_target,
            })
            .await
            .inspect_err(|e| {
                if matches!(e, SignalError::Conflict(_)) {
                    warn!(
                        target: "sig.registry",
                        "Generated room tokens collided with an existing session"
                    );
                }
            })?;

        metrics::record_session_created();

        info!(
            target: "sig.registry",
            session_id = %record.id,
            "Session created"
        );

        Ok(CreatedSession {
            session_id: record.id,
            room_handle: record.room_handle,
            connect_target: record.connect_target,
        })
    }

    /// Resolve a room handle and check the password.
    ///
    /// Fails with `NotFound` for an unknown handle and `InvalidCredentials`
    /// on mismatch. Both paths cost one bcrypt verification.
    #[instrument(skip_all, name = "sig.registry.resolve_and_authorize")]
    pub async fn resolve_and_authorize(
        &self,
        room_handle: &RoomHandle,
        password: SecretString,
    ) -> Result<JoinGrant, SignalError> {
        let record = self.store.find_by_room_handle(room_handle).await?;
        let credentials = self.credentials.clone();

        let Some(record) = record else {
            tokio::task::spawn_blocking(move || credentials.verify_against_dummy(&password))
                .await
                .map_err(|e| SignalError::Internal(format!("verify task failed: {e}")))?;
            metrics::record_join_attempt("not_found");
            debug!(target: "sig.registry", "Join rejected: unknown room handle");
            return Err(SignalError::NotFound("Room not found".to_string()));
        };

        let hash = record.password_hash.clone();
        let matches =
            tokio::task::spawn_blocking(move || credentials.verify_password(&password, &hash))
                .await
                .map_err(|e| SignalError::Internal(format!("verify task failed: {e}")))??;

        if !matches {
            metrics::record_join_attempt("invalid_password");
            debug!(
                target: "sig.registry",
                session_id = %record.id,
                "Join rejected: password mismatch"
            );
            return Err(SignalError::InvalidCredentials);
        }

        metrics::record_join_attempt("success");

        Ok(JoinGrant {
            title: record.title,
            room_handle: record.room_handle,
            connect_target: record.connect_target,
        })
    }

    /// Whether a room handle names a known session.
    pub async fn exists(&self, room_handle: &RoomHandle) -> Result<bool, SignalError> {
        self.store.room_handle_exists(room_handle).await
    }

    /// Whether a connect target names a known session.
    pub async fn target_exists(&self, connect_target: &ConnectTarget) -> Result<bool, SignalError> {
        self.store.connect_target_exists(connect_target).await
    }

    /// Check that the backing store is reachable.
    pub async fn ping(&self) -> Result<(), SignalError> {
        self.store.ping().await
    }

    fn validate_password(&self, password: &SecretString) -> Result<(), SignalError> {
        let clear = password.expose_secret();
        if clear.chars().count() < self.min_password_length {
            return Err(SignalError::Validation(format!(
                "password must be at least {} characters",
                self.min_password_length
            )));
        }
        if clear.len() > MAX_PASSWORD_BYTES {
            return Err(SignalError::Validation(format!(
                "password must be at most {} bytes",
                MAX_PASSWORD_BYTES
            )));
        }
        Ok(())
    }
}

fn validate_field(name: &str, value: &str) -> Result<(), SignalError> {
    if value.trim().is_empty() {
        return Err(SignalError::Validation(format!("{name} must not be empty")));
    }
    if value.chars().count() > MAX_FIELD_LENGTH {
        return Err(SignalError::Validation(format!(
            "{name} must be at most {MAX_FIELD_LENGTH} characters"
        )));
    }
    Ok(())
}
