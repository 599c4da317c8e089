//! Session storage.
//!
//! `SessionStore` is the seam between the session registry and persistence.
//! `PgSessionStore` keeps sessions in PostgreSQL; the in-memory store in
//! [`super::memory`] implements the same contract for single-node use and
//! tests.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Only password hashes are stored
//! - Unique constraints on both tokens surface as `Conflict`

use crate::errors::SignalError;
use crate::models::{NewSession, SessionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ConnectTarget, RoomHandle, SessionId};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

/// Persistence operations needed by the session registry.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session and its token pair atomically.
    ///
    /// Fails with `Conflict` when either token is already taken.
    async fn insert_session(&self, new: NewSession) -> Result<SessionRecord, SignalError>;

    /// Look up a session by its discovery handle.
    async fn find_by_room_handle(
        &self,
        room_handle: &RoomHandle,
    ) -> Result<Option<SessionRecord>, SignalError>;

    async fn room_handle_exists(&self, room_handle: &RoomHandle) -> Result<bool, SignalError>;

    async fn connect_target_exists(
        &self,
        connect_target: &ConnectTarget,
    ) -> Result<bool, SignalError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), SignalError>;
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: Uuid,
    host: String,
    title: String,
    password_hash: String,
    room_handle: String,
    connect_target: String,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        SessionRecord {
            id: SessionId(row.session_id),
            host: row.host,
            title: row.title,
            password_hash: row.password_hash,
            room_handle: RoomHandle::new(row.room_handle),
            connect_target: ConnectTarget::new(row.connect_target),
            created_at: row.created_at,
        }
    }
}

const SELECT_SESSION: &str = r#"
    SELECT
        s.session_id, s.host, s.title, s.password_hash, s.created_at,
        l.room_handle, l.connect_target
    FROM room_links l
    JOIN sessions s ON s.session_id = l.session_id
"#;

/// PostgreSQL-backed session store.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations from the workspace `migrations/` directory.
    pub async fn migrate(&self) -> Result<(), SignalError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SignalError::Store(format!("Migration failed: {}", e)))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[instrument(skip_all, name = "sig.store.insert_session")]
    async fn insert_session(&self, new: NewSession) -> Result<SessionRecord, SignalError> {
        let mut tx = self.pool.begin().await?;

        let (session_id, created_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO sessions (host, title, password_hash)
            VALUES ($1, $2, $3)
            RETURNING session_id, created_at
            "#,
        )
        .bind(&new.host)
        .bind(&new.title)
        .bind(&new.password_hash)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO room_links (room_handle, connect_target, session_id)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(new.room_handle.as_str())
        .bind(new.connect_target.as_str())
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SessionRecord {
            id: SessionId(session_id),
            host: new.host,
            title: new.title,
            password_hash: new.password_hash,
            room_handle: new.room_handle,
            connect_target: new.connect_target,
            created_at,
        })
    }

    #[instrument(skip_all, name = "sig.store.find_by_room_handle")]
    async fn find_by_room_handle(
        &self,
        room_handle: &RoomHandle,
    ) -> Result<Option<SessionRecord>, SignalError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "{SELECT_SESSION} WHERE l.room_handle = $1"
        ))
        .bind(room_handle.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SessionRecord::from))
    }

    async fn room_handle_exists(&self, room_handle: &RoomHandle) -> Result<bool, SignalError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM room_links WHERE room_handle = $1)")
                .bind(room_handle.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn connect_target_exists(
        &self,
        connect_target: &ConnectTarget,
    ) -> Result<bool, SignalError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM room_links WHERE connect_target = $1)")
                .bind(connect_target.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn ping(&self) -> Result<(), SignalError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
