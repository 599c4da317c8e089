//! `RoomDirectoryActor` - singleton that owns the connect target to room map.
//!
//! The directory:
//! - Creates a `RoomActor` the first time a target is admitted
//! - Hands out handles to live rooms
//! - Forgets a room when it reports itself closed, or when its task ends
//! - Cancels every room on shutdown
//!
//! Rooms carry an instance number. A `RoomClosed` report for an instance
//! that was already replaced is ignored, so a late prune never removes a
//! freshly created room for the same target.

use super::messages::{DirectoryMessage, DirectoryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomSettings};
use crate::errors::SignalError;

use common::types::ConnectTarget;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the directory mailbox.
const DIRECTORY_CHANNEL_BUFFER: usize = 1000;

/// How long shutdown waits for each room task.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `RoomDirectoryActor`.
#[derive(Clone, Debug)]
pub struct RoomDirectoryHandle {
    sender: mpsc::Sender<DirectoryMessage>,
    cancel_token: CancellationToken,
}

impl RoomDirectoryHandle {
    /// Spawn the directory actor and return a handle to it.
    #[must_use]
    pub fn new(settings: RoomSettings, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(DIRECTORY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomDirectoryActor::new(
            receiver,
            sender.downgrade(),
            cancel_token.clone(),
            settings,
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Get the live room for `target`, creating it if needed.
    pub async fn room_for(&self, target: ConnectTarget) -> Result<RoomActorHandle, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DirectoryMessage::GetOrCreate {
                target,
                respond_to: tx,
            })
            .await
            .map_err(|_| directory_unavailable())?;

        rx.await.map_err(|_| directory_unavailable())?
    }

    /// Get the live room for `target` without creating one.
    pub async fn lookup(&self, target: ConnectTarget) -> Result<Option<RoomActorHandle>, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DirectoryMessage::Lookup {
                target,
                respond_to: tx,
            })
            .await
            .map_err(|_| directory_unavailable())?;

        rx.await.map_err(|_| directory_unavailable())
    }

    /// Number of participants currently in the room for `target`.
    ///
    /// A target with no live room has no members.
    pub async fn member_count(&self, target: &ConnectTarget) -> usize {
        match self.lookup(target.clone()).await {
            Ok(Some(room)) => room.member_count().await.unwrap_or(0),
            _ => 0,
        }
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> Result<usize, SignalError> {
        Ok(self.status().await?.room_count)
    }

    pub async fn status(&self) -> Result<DirectoryStatus, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DirectoryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|_| directory_unavailable())?;

        rx.await.map_err(|_| directory_unavailable())
    }

    /// Cancel the directory and, through it, every room.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Token cancelled together with the directory.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

fn directory_unavailable() -> SignalError {
    SignalError::ServiceUnavailable("room directory is shutting down".to_string())
}

struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `RoomDirectoryActor` implementation.
pub struct RoomDirectoryActor {
    receiver: mpsc::Receiver<DirectoryMessage>,
    /// Given to rooms so they can report closure.
    self_sender: mpsc::WeakSender<DirectoryMessage>,
    cancel_token: CancellationToken,
    settings: RoomSettings,
    rooms: HashMap<ConnectTarget, ManagedRoom>,
    next_instance: u64,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomDirectoryActor {
    fn new(
        receiver: mpsc::Receiver<DirectoryMessage>,
        self_sender: mpsc::WeakSender<DirectoryMessage>,
        cancel_token: CancellationToken,
        settings: RoomSettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            receiver,
            self_sender,
            cancel_token,
            settings,
            rooms: HashMap::new(),
            next_instance: 0,
            accepting_new: true,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Directory, "directory"),
        }
    }

    #[instrument(skip_all, name = "sig.actor.directory")]
    async fn run(mut self) {
        info!(target: "sig.actor.directory", "RoomDirectoryActor started");

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sig.actor.directory",
                        "RoomDirectoryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_depth(self.receiver.len() + 1);
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "sig.actor.directory",
                                "RoomDirectoryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sig.actor.directory",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomDirectoryActor stopped"
        );
    }

    fn handle_message(&mut self, message: DirectoryMessage) {
        match message {
            DirectoryMessage::GetOrCreate { target, respond_to } => {
                let result = self.get_or_create(target);
                let _ = respond_to.send(result);
            }

            DirectoryMessage::Lookup { target, respond_to } => {
                let room = self
                    .rooms
                    .get(&target)
                    .filter(|managed| !managed.handle.is_closed())
                    .map(|managed| managed.handle.clone());
                let _ = respond_to.send(room);
            }

            DirectoryMessage::RoomClosed { target, instance } => {
                let current = self
                    .rooms
                    .get(&target)
                    .is_some_and(|managed| managed.handle.instance() == instance);

                if current {
                    self.rooms.remove(&target);
                    debug!(
                        target: "sig.actor.directory",
                        room = %target,
                        instance,
                        rooms = self.rooms.len(),
                        "Room pruned"
                    );
                }
            }

            DirectoryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(DirectoryStatus {
                    room_count: self.rooms.len(),
                    mailbox_depth: self.mailbox.current_depth(),
                    is_shutting_down: !self.accepting_new,
                });
            }
        }
    }

    fn get_or_create(&mut self, target: ConnectTarget) -> Result<RoomActorHandle, SignalError> {
        if !self.accepting_new {
            return Err(directory_unavailable());
        }

        if let Some(managed) = self.rooms.get(&target) {
            if !managed.handle.is_closed() {
                return Ok(managed.handle.clone());
            }
        }

        self.next_instance += 1;
        let instance = self.next_instance;

        let (handle, task_handle) = RoomActor::spawn(
            target.clone(),
            instance,
            self.settings,
            self.self_sender.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        debug!(
            target: "sig.actor.directory",
            room = %target,
            instance,
            "Room created"
        );

        self.rooms.insert(
            target,
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );

        Ok(handle)
    }

    /// Drop rooms whose task ended without reporting, and surface panics.
    async fn check_room_health(&mut self) {
        let finished: Vec<ConnectTarget> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(target, _)| target.clone())
            .collect();

        for target in finished {
            let Some(managed) = self.rooms.remove(&target) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "sig.actor.directory",
                        room = %target,
                        "Room actor exited"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "sig.actor.directory",
                        room = %target,
                        error = ?join_error,
                        "Room actor panicked"
                    );
                    self.metrics.record_panic(ActorType::Room);
                }
                Err(join_error) => {
                    warn!(
                        target: "sig.actor.directory",
                        room = %target,
                        error = ?join_error,
                        "Room actor task cancelled"
                    );
                }
            }
        }
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        info!(
            target: "sig.actor.directory",
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (target, managed) in self.rooms.drain() {
            match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "sig.actor.directory",
                        room = %target,
                        error = ?e,
                        "Room actor task failed during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sig.actor.directory",
                        room = %target,
                        "Room actor shutdown timed out"
                    );
                }
            }
        }

        info!(target: "sig.actor.directory", "Graceful shutdown complete");
    }
}
