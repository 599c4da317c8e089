//! Identifiers shared by the relay service and its test harness.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Store-assigned identifier of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Server-assigned identifier of one relay connection.
///
/// Distinguishes two connections that claim the same participant id, so a
/// stale connection's cleanup never removes its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Declares an opaque string token with the usual conversions.
macro_rules! string_token {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing token value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the token as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the token is the empty string.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Consume the token, returning the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_token!(
    /// Token that names a room for discovery and join.
    RoomHandle
);

string_token!(
    /// Token a joined caller uses to open a relay connection.
    ConnectTarget
);

string_token!(
    /// Caller-chosen identity of a participant inside a room.
    ParticipantId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_serialize_as_plain_strings() {
        let handle = RoomHandle::new("abc");
        let json = serde_json::to_string(&handle).expect("serialize");
        assert_eq!(json, "\"abc\"");

        let back: ParticipantId = serde_json::from_str("\"peer-a\"").expect("deserialize");
        assert_eq!(back.as_str(), "peer-a");
    }

    #[test]
    fn test_token_display_and_empty() {
        let target = ConnectTarget::from("room-target");
        assert_eq!(target.to_string(), "room-target");
        assert!(!target.is_empty());
        assert!(ParticipantId::from("").is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
