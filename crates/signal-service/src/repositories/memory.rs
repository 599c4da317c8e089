//! In-memory session store.
//!
//! Used when no database is configured and by the test suite. Holds the same
//! uniqueness rules as the Postgres schema: one session per room handle and
//! one room handle per connect target.

use super::sessions::SessionStore;
use crate::errors::SignalError;
use crate::models::{NewSession, SessionRecord};
use async_trait::async_trait;
use common::types::{ConnectTarget, RoomHandle, SessionId};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    by_handle: HashMap<RoomHandle, SessionRecord>,
    target_to_handle: HashMap<ConnectTarget, RoomHandle>,
}

/// Session store kept in process memory.
#[derive(Default)]
pub struct InMemorySessionStore {
    tables: RwLock<Tables>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub async fn len(&self) -> usize {
        self.tables.read().await.by_handle.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert_session(&self, new: NewSession) -> Result<SessionRecord, SignalError> {
        let mut tables = self.tables.write().await;

        if tables.by_handle.contains_key(&new.room_handle)
            || tables.target_to_handle.contains_key(&new.connect_target)
        {
            return Err(SignalError::Conflict(
                "Room token already in use".to_string(),
            ));
        }

        let record = SessionRecord {
            id: SessionId::new(),
            host: new.host,
            title: new.title,
            password_hash: new.password_hash,
            room_handle: new.room_handle,
            connect_target: new.connect_target,
            created_at: chrono::Utc::now(),
        };

        tables
            .target_to_handle
            .insert(record.connect_target.clone(), record.room_handle.clone());
        tables
            .by_handle
            .insert(record.room_handle.clone(), record.clone());

        Ok(record)
    }

    async fn find_by_room_handle(
        &self,
        room_handle: &RoomHandle,
    ) -> Result<Option<SessionRecord>, SignalError> {
        Ok(self.tables.read().await.by_handle.get(room_handle).cloned())
    }

    async fn room_handle_exists(&self, room_handle: &RoomHandle) -> Result<bool, SignalError> {
        Ok(self.tables.read().await.by_handle.contains_key(room_handle))
    }

    async fn connect_target_exists(
        &self,
        connect_target: &ConnectTarget,
    ) -> Result<bool, SignalError> {
        Ok(self
            .tables
            .read()
            .await
            .target_to_handle
            .contains_key(connect_target))
    }

    async fn ping(&self) -> Result<(), SignalError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn new_session(handle: &str, target: &str) -> NewSession {
        NewSession {
            host: "h1".to_string(),
            title: "Standup".to_string(),
            password_hash: "$2b$04$hash".to_string(),
            room_handle: RoomHandle::new(handle),
            connect_target: ConnectTarget::new(target),
        }
    }

    #[tokio::test]
    async fn test_insert_then_lookup() {
        let store = InMemorySessionStore::new();
        let record = store.insert_session(new_session("h-1", "t-1")).await.unwrap();

        let by_handle = store
            .find_by_room_handle(&RoomHandle::new("h-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_handle.id, record.id);
        assert_eq!(by_handle.title, "Standup");

        assert!(store.room_handle_exists(&RoomHandle::new("h-1")).await.unwrap());
        assert!(store
            .connect_target_exists(&ConnectTarget::new("t-1"))
            .await
            .unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_tokens() {
        let store = InMemorySessionStore::new();
        assert!(store.is_empty().await);
        assert!(store
            .find_by_room_handle(&RoomHandle::new("missing"))
            .await
            .unwrap()
            .is_none());
        assert!(!store
            .connect_target_exists(&ConnectTarget::new("missing"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_handle_conflicts() {
        let store = InMemorySessionStore::new();
        store.insert_session(new_session("h-1", "t-1")).await.unwrap();

        let result = store.insert_session(new_session("h-1", "t-2")).await;
        assert!(matches!(result, Err(SignalError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_duplicate_target_conflicts() {
        let store = InMemorySessionStore::new();
        store.insert_session(new_session("h-1", "t-1")).await.unwrap();

        let result = store.insert_session(new_session("h-2", "t-1")).await;
        assert!(matches!(result, Err(SignalError::Conflict(_))));

        // The failed insert left nothing behind
        assert!(!store.room_handle_exists(&RoomHandle::new("h-2")).await.unwrap());
    }
}
