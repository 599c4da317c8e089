//! `ConnectionActor` - single writer for one relay connection.
//!
//! Each `ConnectionActor`:
//! - Owns the write half of exactly one websocket
//! - Drains a bounded outbound queue, so frames from different senders
//!   never interleave on the wire
//! - Stops on cancellation, on an explicit close, or on the first write
//!   failure; in every case it cancels its token so the connection's
//!   reader observes the termination
//!
//! Rooms enqueue with `try_deliver` and never wait on a slow socket.

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::signaling::wire::SignalMessage;

use axum::extract::ws::{close_code, CloseFrame, Message};
use common::types::ConnectionId;
use futures_util::{Sink, SinkExt};
use std::borrow::Cow;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Upper bound on sending the final close frame.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Why an enqueue was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The outbound queue is at capacity.
    Full,
    /// The connection actor has stopped.
    Closed,
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Enqueue a message without waiting.
    pub fn try_deliver(&self, message: SignalMessage) -> Result<(), DeliveryError> {
        self.sender
            .try_send(ConnectionMessage::Deliver { message })
            .map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::Full,
                TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Ask the writer to send a close frame and stop.
    ///
    /// Falls back to cancellation when the queue cannot take the request.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let request = ConnectionMessage::Close {
            code,
            reason: reason.into(),
        };
        if self.sender.try_send(request).is_err() {
            self.cancel_token.cancel();
        }
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Whether the writer has stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor<S> {
    connection_id: ConnectionId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    cancel_token: CancellationToken,
    sink: S,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl<S> ConnectionActor<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    /// Spawn a writer for `sink` with an outbound queue of `capacity` messages.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: ConnectionId,
        sink: S,
        cancel_token: CancellationToken,
        capacity: usize,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        let actor = Self {
            connection_id,
            receiver,
            cancel_token: cancel_token.clone(),
            sink,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, connection_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "sig.actor.connection",
        fields(connection_id = %self.connection_id)
    )]
    async fn run(mut self) {
        self.metrics.connection_opened();
        debug!(
            target: "sig.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sig.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.send_close(close_code::AWAY, "connection closed").await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_depth(self.receiver.len() + 1);
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "sig.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        // Refuse further deliveries and wake the reader.
        self.receiver.close();
        self.cancel_token.cancel();
        self.metrics.connection_closed();

        info!(
            target: "sig.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { message } => !self.write(&message).await,
            ConnectionMessage::Close { code, reason } => {
                self.send_close(code, &reason).await;
                true
            }
        }
    }

    /// Write one message. Returns false when the socket is broken.
    async fn write(&mut self, message: &SignalMessage) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: "sig.actor.connection",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Failed to encode relay message"
                );
                return true;
            }
        };

        let result = tokio::select! {
            result = self.sink.send(Message::Text(text)) => result,
            () = self.cancel_token.cancelled() => return false,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: "sig.actor.connection",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Write to peer failed"
                );
                false
            }
        }
    }

    async fn send_close(&mut self, code: u16, reason: &str) {
        let frame = Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Owned(reason.to_string()),
        }));

        match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, self.sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(
                    target: "sig.actor.connection",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Close frame not sent"
                );
            }
            Err(_) => {
                debug!(
                    target: "sig.actor.connection",
                    connection_id = %self.connection_id,
                    "Close frame timed out"
                );
            }
        }
    }
}
