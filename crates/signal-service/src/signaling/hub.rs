//! Relay Hub - per-connection read loop.
//!
//! Each admitted websocket is split in two:
//! - the write half goes to a `ConnectionActor`, the only writer
//! - the read half stays here; frames are parsed and handed to the room
//!
//! The first message on a connection binds its `participantId` inside the
//! room for the connect target. Later messages must carry the same id, and
//! `session_joined` is only ever sent by the server.
//! However the connection ends, the room hears about it once.

use crate::actors::{
    ActorMetrics, ConnectionActor, ConnectionActorHandle, RoomActorHandle, RoomDirectoryHandle,
};
use crate::errors::SignalError;
use crate::observability::metrics as prom;
use crate::signaling::wire::{MessageKind, SignalMessage};

use axum::extract::ws::{close_code, Message, WebSocket};
use common::types::{ConnectTarget, ConnectionId, ParticipantId};
use futures_util::{Sink, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Attempts to join a room that closes underneath the caller.
const ADMIT_ATTEMPTS: usize = 3;

/// How long cleanup waits for the writer to flush its close frame.
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The participant a connection is bound to, and where.
struct Binding {
    participant_id: ParticipantId,
    room: RoomActorHandle,
}

/// Why the read loop stopped.
enum Exit {
    /// Peer closed, stream ended, or shutdown.
    Finished,
    /// A close frame was queued on the writer.
    CloseRequested,
}

/// Admits relay connections and runs their read loops.
#[derive(Clone, Debug)]
pub struct RelayHub {
    directory: RoomDirectoryHandle,
    outbound_capacity: usize,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl RelayHub {
    /// Connections are cancelled together with `directory`.
    #[must_use]
    pub fn new(
        directory: RoomDirectoryHandle,
        outbound_capacity: usize,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let cancel_token = directory.child_token();
        Self {
            directory,
            outbound_capacity,
            cancel_token,
            metrics,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &RoomDirectoryHandle {
        &self.directory
    }

    /// Close every open relay connection.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Serve an upgraded websocket until it terminates.
    pub async fn serve(&self, socket: WebSocket, target: ConnectTarget) {
        let (sink, stream) = socket.split();
        self.relay(ConnectionId::new(), target, sink, stream).await;
    }

    /// Run one connection over an already split transport.
    #[instrument(
        skip_all,
        name = "sig.relay.connection",
        fields(room = %target, connection_id = %connection_id)
    )]
    pub async fn relay<S, R>(
        &self,
        connection_id: ConnectionId,
        target: ConnectTarget,
        sink: S,
        mut stream: R,
    ) where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
        R: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let token = self.cancel_token.child_token();
        let (handle, writer) = ConnectionActor::spawn(
            connection_id,
            sink,
            token.clone(),
            self.outbound_capacity,
            Arc::clone(&self.metrics),
        );
        let writer_abort = writer.abort_handle();

        debug!(
            target: "sig.relay",
            room = %target,
            connection_id = %connection_id,
            "Relay connection opened"
        );

        let mut binding: Option<Binding> = None;
        let exit = self
            .read_loop(&target, &handle, &token, &mut stream, &mut binding)
            .await;

        // Exactly one departure notice; the room ignores it if the binding
        // was already replaced or removed.
        if let Some(Binding {
            participant_id,
            room,
        }) = binding.take()
        {
            let _ = room.disconnected(participant_id, connection_id).await;
        }

        if matches!(exit, Exit::Finished) {
            token.cancel();
        }

        if tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, writer)
            .await
            .is_err()
        {
            warn!(
                target: "sig.relay",
                connection_id = %connection_id,
                "Writer did not stop in time, aborting"
            );
            writer_abort.abort();
        }

        debug!(
            target: "sig.relay",
            room = %target,
            connection_id = %connection_id,
            "Relay connection closed"
        );
    }

    async fn read_loop<R>(
        &self,
        target: &ConnectTarget,
        handle: &ConnectionActorHandle,
        token: &CancellationToken,
        stream: &mut R,
        binding: &mut Option<Binding>,
    ) -> Exit
    where
        R: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        loop {
            let frame = tokio::select! {
                () = token.cancelled() => return Exit::Finished,
                frame = stream.next() => frame,
            };

            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        return reject(
                            handle,
                            SignalError::Protocol("binary frame is not UTF-8".to_string()),
                        );
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Exit::Finished,
                Some(Err(e)) => {
                    debug!(
                        target: "sig.relay",
                        connection_id = %handle.connection_id(),
                        error = %e,
                        "Read failed"
                    );
                    return Exit::Finished;
                }
            };

            let message = match SignalMessage::parse(&text) {
                Ok(message) => message,
                Err(e) => return reject(handle, e),
            };

            match self.dispatch(target, handle, binding, message).await {
                Ok(()) => {}
                Err(e @ SignalError::Protocol(_)) => return reject(handle, e),
                Err(e) => {
                    warn!(
                        target: "sig.relay",
                        connection_id = %handle.connection_id(),
                        error = %e,
                        "Room unavailable, closing connection"
                    );
                    handle.close(close_code::AWAY, "room unavailable");
                    return Exit::CloseRequested;
                }
            }
        }
    }

    async fn dispatch(
        &self,
        target: &ConnectTarget,
        handle: &ConnectionActorHandle,
        binding: &mut Option<Binding>,
        message: SignalMessage,
    ) -> Result<(), SignalError> {
        if message.kind == MessageKind::SessionJoined {
            return Err(SignalError::Protocol(
                "session_joined is sent by the server only".to_string(),
            ));
        }

        let room = match binding {
            Some(bound) if bound.participant_id != message.participant_id => {
                return Err(SignalError::Protocol(
                    "participantId does not match this connection".to_string(),
                ));
            }
            Some(bound) => bound.room.clone(),
            None => {
                let room = self.admit(target, &message.participant_id, handle).await?;
                *binding = Some(Binding {
                    participant_id: message.participant_id.clone(),
                    room: room.clone(),
                });
                room
            }
        };

        let leaving = message.kind == MessageKind::Leave;
        room.inbound(message.participant_id.clone(), handle.connection_id(), message)
            .await?;

        if leaving {
            *binding = None;
        }

        Ok(())
    }

    /// Bind `participant_id` to this connection in the target's room.
    async fn admit(
        &self,
        target: &ConnectTarget,
        participant_id: &ParticipantId,
        handle: &ConnectionActorHandle,
    ) -> Result<RoomActorHandle, SignalError> {
        for _ in 0..ADMIT_ATTEMPTS {
            let room = self.directory.room_for(target.clone()).await?;

            match room.join(participant_id.clone(), handle.clone()).await {
                Ok(outcome) => {
                    info!(
                        target: "sig.relay",
                        room = %target,
                        participant_id = %participant_id,
                        connection_id = %handle.connection_id(),
                        outcome = ?outcome,
                        "Participant admitted"
                    );
                    return Ok(room);
                }
                // The room emptied and closed between lookup and join.
                Err(SignalError::RoomClosed) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(SignalError::RoomClosed)
    }
}

fn reject(handle: &ConnectionActorHandle, error: SignalError) -> Exit {
    info!(
        target: "sig.relay",
        connection_id = %handle.connection_id(),
        error = %error,
        "Closing connection on protocol violation"
    );
    prom::record_protocol_violation();
    handle.close(close_code::POLICY, "protocol violation");
    Exit::CloseRequested
}
