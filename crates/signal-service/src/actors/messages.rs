//! Message types for actor communication.
//!
//! All inter-actor communication uses typed messages over `tokio::sync::mpsc`.
//! Request-reply uses `tokio::sync::oneshot`.

use super::connection::ConnectionActorHandle;
use super::room::RoomActorHandle;
use crate::errors::SignalError;
use crate::signaling::wire::SignalMessage;
use common::types::{ConnectTarget, ConnectionId, ParticipantId};
use tokio::sync::oneshot;

/// Messages sent to the `RoomDirectoryActor`.
#[derive(Debug)]
pub enum DirectoryMessage {
    /// Get the live room for a target, creating it if absent.
    GetOrCreate {
        target: ConnectTarget,
        respond_to: oneshot::Sender<Result<RoomActorHandle, SignalError>>,
    },

    /// Get the live room for a target without creating it.
    Lookup {
        target: ConnectTarget,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },

    /// A room emptied and stopped accepting messages.
    RoomClosed {
        target: ConnectTarget,
        /// Instance that closed; a newer instance for the same target is kept.
        instance: u64,
    },

    /// Get directory status.
    GetStatus {
        respond_to: oneshot::Sender<DirectoryStatus>,
    },
}

/// Snapshot of the room directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryStatus {
    pub room_count: usize,
    pub mailbox_depth: usize,
    pub is_shutting_down: bool,
}

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Bind a participant to a connection inside this room.
    Join {
        participant_id: ParticipantId,
        connection: ConnectionActorHandle,
        respond_to: oneshot::Sender<Result<JoinOutcome, SignalError>>,
    },

    /// A message read from a member's connection, to be routed.
    Inbound {
        participant_id: ParticipantId,
        connection_id: ConnectionId,
        message: SignalMessage,
    },

    /// A member's connection terminated.
    ///
    /// Ignored unless `connection_id` is still the participant's binding.
    Disconnected {
        participant_id: ParticipantId,
        connection_id: ConnectionId,
    },

    /// Get the current member set.
    GetMembers {
        respond_to: oneshot::Sender<Vec<ParticipantId>>,
    },
}

/// How a join changed the member set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// New participant in this room.
    Joined,
    /// Participant was already bound to this connection.
    AlreadyMember,
    /// Participant moved from an older connection, which was closed.
    Replaced,
}

/// Messages sent to a `ConnectionActor` (its outbound queue).
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Write a relay message to the socket.
    Deliver { message: SignalMessage },

    /// Send a close frame and stop.
    Close { code: u16, reason: String },
}
