//! Relay wire format.
//!
//! Every frame on an open relay connection is one JSON object:
//!
//! ```text
//! { "type": "...", "participantId": "...", "payload": "...", "to": "..." }
//! ```
//!
//! `payload` is carried verbatim and never inspected. `to` is optional; an
//! empty string is read as absent.

use crate::errors::SignalError;
use common::types::ParticipantId;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Message type tag.
///
/// Unknown tags are kept as `Other` and relayed like negotiation messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Registers the sender in the room.
    Connect,
    Offer,
    Answer,
    Candidate,
    /// Sender is leaving; `disconnect` is read as an alias.
    Leave,
    /// Server acknowledgement of `connect`, sent to the sender only.
    SessionJoined,
    Other(String),
}

impl MessageKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Connect => "connect",
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::Candidate => "candidate",
            MessageKind::Leave => "leave",
            MessageKind::SessionJoined => "session_joined",
            MessageKind::Other(tag) => tag,
        }
    }

    /// Bounded label for metrics.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            MessageKind::Connect => "connect",
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::Candidate => "candidate",
            MessageKind::Leave => "leave",
            MessageKind::SessionJoined => "session_joined",
            MessageKind::Other(_) => "other",
        }
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "connect" => MessageKind::Connect,
            "offer" => MessageKind::Offer,
            "answer" => MessageKind::Answer,
            "candidate" => MessageKind::Candidate,
            "leave" | "disconnect" => MessageKind::Leave,
            "session_joined" => MessageKind::SessionJoined,
            _ => MessageKind::Other(tag),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One relay message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,

    #[serde(rename = "participantId")]
    pub participant_id: ParticipantId,

    #[serde(default)]
    pub payload: String,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub to: Option<ParticipantId>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<ParticipantId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()).map(ParticipantId::new))
}

impl SignalMessage {
    pub fn new(kind: MessageKind, participant_id: ParticipantId, payload: impl Into<String>) -> Self {
        Self {
            kind,
            participant_id,
            payload: payload.into(),
            to: None,
        }
    }

    #[must_use]
    pub fn to(mut self, recipient: ParticipantId) -> Self {
        self.to = Some(recipient);
        self
    }

    /// Acknowledgement sent back to a participant after `connect`.
    #[must_use]
    pub fn session_joined(participant_id: ParticipantId) -> Self {
        Self::new(MessageKind::SessionJoined, participant_id, "")
    }

    /// Notice that `participant_id` left the room.
    #[must_use]
    pub fn leave(participant_id: ParticipantId) -> Self {
        Self::new(MessageKind::Leave, participant_id, "")
    }

    /// Presence notice that `participant_id` connected.
    #[must_use]
    pub fn presence(participant_id: ParticipantId) -> Self {
        Self::new(MessageKind::Connect, participant_id, "")
    }

    /// Parse one inbound frame.
    pub fn parse(text: &str) -> Result<Self, SignalError> {
        let message: SignalMessage = serde_json::from_str(text)
            .map_err(|e| SignalError::Protocol(format!("malformed message: {}", e)))?;

        if message.participant_id.is_empty() {
            return Err(SignalError::Protocol(
                "participantId must not be empty".to_string(),
            ));
        }

        Ok(message)
    }
}
