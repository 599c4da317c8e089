//! `RoomActor` - owns the member set of one room.
//!
//! Each `RoomActor`:
//! - Is keyed by a connect target and created lazily by the directory
//! - Serializes every membership change and routing decision through its
//!   mailbox, so rooms never contend with each other
//! - Enqueues outbound messages on member connections without waiting
//! - Closes itself once its member set empties
//!
//! # Routing
//!
//! | Inbound type | Delivered to |
//! |--------------|--------------|
//! | `connect`    | `session_joined` back to the sender (plus presence to others when enabled) |
//! | `leave`      | every other member (payload kept), then the sender is removed |
//! | anything else with `to` | that participant only |
//! | anything else without `to` | every other member |
//!
//! A member whose connection is gone, or whose queue stays full for
//! `slow_peer_strikes` consecutive deliveries, is evicted and the rest of
//! the room receives a `leave` for it.

use super::connection::{ConnectionActorHandle, DeliveryError};
use super::messages::{DirectoryMessage, JoinOutcome, RoomMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::config::DEFAULT_SLOW_PEER_STRIKES;
use crate::errors::SignalError;
use crate::observability::metrics as prom;
use crate::signaling::wire::{MessageKind, SignalMessage};

use common::types::{ConnectTarget, ConnectionId, ParticipantId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// How often a room that never gained a member checks whether to close.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Close code sent to a connection whose participant id was claimed again.
pub const REPLACED_CLOSE_CODE: u16 = 4000;

/// Routing knobs shared by every room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSettings {
    /// Consecutive full-queue drops before a member is evicted.
    pub slow_peer_strikes: u32,
    /// Send a presence notice to other members on `connect`.
    pub announce_joins: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            slow_peer_strikes: DEFAULT_SLOW_PEER_STRIKES,
            announce_joins: false,
        }
    }
}

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    target: ConnectTarget,
    instance: u64,
}

impl RoomActorHandle {
    #[must_use]
    pub fn target(&self) -> &ConnectTarget {
        &self.target
    }

    /// Directory-assigned instance number.
    #[must_use]
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Whether the room stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Bind `participant_id` to `connection` in this room.
    ///
    /// Fails with `RoomClosed` when the room shut down first; the caller
    /// should ask the directory for a fresh room.
    pub async fn join(
        &self,
        participant_id: ParticipantId,
        connection: ConnectionActorHandle,
    ) -> Result<JoinOutcome, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                participant_id,
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|_| SignalError::RoomClosed)?;

        rx.await.map_err(|_| SignalError::RoomClosed)?
    }

    /// Route a message read from a member's connection.
    pub async fn inbound(
        &self,
        participant_id: ParticipantId,
        connection_id: ConnectionId,
        message: SignalMessage,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::Inbound {
                participant_id,
                connection_id,
                message,
            })
            .await
            .map_err(|_| SignalError::RoomClosed)
    }

    /// Report that a member's connection terminated.
    pub async fn disconnected(
        &self,
        participant_id: ParticipantId,
        connection_id: ConnectionId,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::Disconnected {
                participant_id,
                connection_id,
            })
            .await
            .map_err(|_| SignalError::RoomClosed)
    }

    /// Current members, sorted.
    pub async fn members(&self) -> Result<Vec<ParticipantId>, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetMembers { respond_to: tx })
            .await
            .map_err(|_| SignalError::RoomClosed)?;

        rx.await.map_err(|_| SignalError::RoomClosed)
    }

    pub async fn member_count(&self) -> Result<usize, SignalError> {
        Ok(self.members().await?.len())
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// Why a member left the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    Left,
    Disconnected,
    Evicted,
}

impl Departure {
    const fn as_str(self) -> &'static str {
        match self {
            Departure::Left => "left",
            Departure::Disconnected => "disconnected",
            Departure::Evicted => "evicted",
        }
    }
}

#[derive(Debug)]
struct Member {
    connection: ConnectionActorHandle,
    /// Consecutive deliveries dropped on a full queue.
    strikes: u32,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    target: ConnectTarget,
    instance: u64,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    directory: mpsc::WeakSender<DirectoryMessage>,
    settings: RoomSettings,
    members: HashMap<ParticipantId, Member>,
    /// Set once the first participant joins.
    occupied: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a room for `target`.
    ///
    /// `directory` is held weakly so a room never keeps the directory alive.
    pub fn spawn(
        target: ConnectTarget,
        instance: u64,
        settings: RoomSettings,
        directory: mpsc::WeakSender<DirectoryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            target: target.clone(),
            instance,
            receiver,
            cancel_token: cancel_token.clone(),
            directory,
            settings,
            members: HashMap::new(),
            occupied: false,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, target.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            target,
            instance,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "sig.actor.room", fields(room = %self.target, instance = self.instance))]
    async fn run(mut self) {
        self.metrics.room_created();
        debug!(
            target: "sig.actor.room",
            room = %self.target,
            instance = self.instance,
            "RoomActor started"
        );

        let mut idle_check =
            tokio::time::interval_at(Instant::now() + IDLE_CHECK_INTERVAL, IDLE_CHECK_INTERVAL);
        idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sig.actor.room",
                        room = %self.target,
                        members = self.members.len(),
                        "RoomActor received cancellation signal"
                    );
                    self.shutdown_members();
                    self.receiver.close();
                    break;
                }

                _ = idle_check.tick() => {
                    if self.members.is_empty() {
                        self.close_and_notify().await;
                        break;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_depth(self.receiver.len() + 1);
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if self.occupied && self.members.is_empty() {
                                self.close_and_notify().await;
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.metrics.room_removed();
        info!(
            target: "sig.actor.room",
            room = %self.target,
            instance = self.instance,
            messages_processed = self.mailbox.messages_processed(),
            messages_dropped = self.mailbox.messages_dropped(),
            peak_depth = self.mailbox.peak_depth(),
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                participant_id,
                connection,
                respond_to,
            } => {
                let outcome = self.join(participant_id, connection);
                let _ = respond_to.send(Ok(outcome));
            }

            RoomMessage::Inbound {
                participant_id,
                connection_id,
                message,
            } => self.route(&participant_id, connection_id, message),

            RoomMessage::Disconnected {
                participant_id,
                connection_id,
            } => {
                if self.is_bound(&participant_id, connection_id) {
                    let notice = SignalMessage::leave(participant_id.clone());
                    self.remove_member(participant_id, Departure::Disconnected, notice);
                }
            }

            RoomMessage::GetMembers { respond_to } => {
                let mut members: Vec<ParticipantId> = self.members.keys().cloned().collect();
                members.sort();
                let _ = respond_to.send(members);
            }
        }
    }

    fn join(&mut self, participant_id: ParticipantId, connection: ConnectionActorHandle) -> JoinOutcome {
        self.occupied = true;

        let member = Member {
            connection,
            strikes: 0,
        };

        match self.members.insert(participant_id.clone(), member) {
            None => {
                self.metrics.participant_joined();
                info!(
                    target: "sig.actor.room",
                    room = %self.target,
                    participant_id = %participant_id,
                    members = self.members.len(),
                    "Participant joined room"
                );
                JoinOutcome::Joined
            }
            Some(previous) => {
                let same_connection = self
                    .members
                    .get(&participant_id)
                    .is_some_and(|m| m.connection.connection_id() == previous.connection.connection_id());

                if same_connection {
                    JoinOutcome::AlreadyMember
                } else {
                    info!(
                        target: "sig.actor.room",
                        room = %self.target,
                        participant_id = %participant_id,
                        old_connection_id = %previous.connection.connection_id(),
                        "Participant rebound to a new connection"
                    );
                    previous
                        .connection
                        .close(REPLACED_CLOSE_CODE, "participant connected elsewhere");
                    JoinOutcome::Replaced
                }
            }
        }
    }

    fn is_bound(&self, participant_id: &ParticipantId, connection_id: ConnectionId) -> bool {
        self.members
            .get(participant_id)
            .is_some_and(|m| m.connection.connection_id() == connection_id)
    }

    fn route(&mut self, sender: &ParticipantId, connection_id: ConnectionId, message: SignalMessage) {
        if !self.is_bound(sender, connection_id) {
            debug!(
                target: "sig.actor.room",
                room = %self.target,
                participant_id = %sender,
                "Dropping message from unbound connection"
            );
            return;
        }

        let kind = message.kind.metric_label();
        let mut evictions = Vec::new();

        match message.kind {
            MessageKind::Connect => {
                self.deliver(sender, SignalMessage::session_joined(sender.clone()), &mut evictions);
                prom::record_relay_message(kind, "reply");

                if self.settings.announce_joins {
                    self.broadcast(sender, &SignalMessage::presence(sender.clone()), &mut evictions);
                }
            }

            MessageKind::Leave => {
                prom::record_relay_message(kind, "broadcast");
                // Forwarded as sent, under the canonical tag and to everyone.
                let notice = SignalMessage {
                    kind: MessageKind::Leave,
                    to: None,
                    ..message
                };
                self.remove_member(sender.clone(), Departure::Left, notice);
                return;
            }

            _ => match message.to.clone() {
                Some(recipient) if &recipient == sender => {
                    prom::record_relay_drop("self_target");
                }
                Some(recipient) => {
                    if self.members.contains_key(&recipient) {
                        self.deliver(&recipient, message, &mut evictions);
                        prom::record_relay_message(kind, "direct");
                    } else {
                        debug!(
                            target: "sig.actor.room",
                            room = %self.target,
                            participant_id = %sender,
                            recipient = %recipient,
                            "Recipient not in room"
                        );
                        prom::record_relay_drop("unknown_recipient");
                    }
                }
                None => {
                    self.broadcast(sender, &message, &mut evictions);
                    prom::record_relay_message(kind, "broadcast");
                }
            },
        }

        self.process_evictions(evictions);
    }

    /// Enqueue `message` for one member.
    fn deliver(
        &mut self,
        recipient: &ParticipantId,
        message: SignalMessage,
        evictions: &mut Vec<ParticipantId>,
    ) {
        let strike_limit = self.settings.slow_peer_strikes;
        let Some(member) = self.members.get_mut(recipient) else {
            return;
        };

        match member.connection.try_deliver(message) {
            Ok(()) => member.strikes = 0,
            Err(DeliveryError::Full) => {
                member.strikes += 1;
                self.mailbox.record_drop();
                prom::record_relay_drop("queue_full");

                if member.strikes >= strike_limit {
                    warn!(
                        target: "sig.actor.room",
                        room = %self.target,
                        participant_id = %recipient,
                        strikes = member.strikes,
                        "Evicting slow peer"
                    );
                    prom::record_slow_peer_eviction();
                    evictions.push(recipient.clone());
                }
            }
            Err(DeliveryError::Closed) => {
                prom::record_relay_drop("peer_gone");
                evictions.push(recipient.clone());
            }
        }
    }

    /// Enqueue `message` for every member except `sender`.
    fn broadcast(
        &mut self,
        sender: &ParticipantId,
        message: &SignalMessage,
        evictions: &mut Vec<ParticipantId>,
    ) {
        let recipients: Vec<ParticipantId> = self
            .members
            .keys()
            .filter(|p| *p != sender)
            .cloned()
            .collect();

        for recipient in recipients {
            self.deliver(&recipient, message.clone(), evictions);
        }
    }

    fn process_evictions(&mut self, mut evictions: Vec<ParticipantId>) {
        while let Some(participant_id) = evictions.pop() {
            let notice = SignalMessage::leave(participant_id.clone());
            self.depart(participant_id, Departure::Evicted, &notice, &mut evictions);
        }
    }

    fn remove_member(&mut self, participant_id: ParticipantId, reason: Departure, notice: SignalMessage) {
        let mut evictions = Vec::new();
        self.depart(participant_id, reason, &notice, &mut evictions);
        self.process_evictions(evictions);
    }

    /// Remove a member and send `notice` to the rest of the room, once.
    fn depart(
        &mut self,
        participant_id: ParticipantId,
        reason: Departure,
        notice: &SignalMessage,
        evictions: &mut Vec<ParticipantId>,
    ) {
        let Some(member) = self.members.remove(&participant_id) else {
            return;
        };

        if reason == Departure::Evicted {
            member.connection.cancel();
        }
        self.metrics.participant_left();

        info!(
            target: "sig.actor.room",
            room = %self.target,
            participant_id = %participant_id,
            reason = reason.as_str(),
            members = self.members.len(),
            "Participant removed from room"
        );

        self.broadcast(&participant_id, notice, evictions);
    }

    fn shutdown_members(&mut self) {
        for (_, member) in self.members.drain() {
            member.connection.cancel();
            self.metrics.participant_left();
        }
    }

    /// Stop accepting messages and tell the directory this instance is gone.
    async fn close_and_notify(&mut self) {
        self.receiver.close();

        // Anything already queued raced with the close.
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                RoomMessage::Join { respond_to, .. } => {
                    let _ = respond_to.send(Err(SignalError::RoomClosed));
                }
                RoomMessage::GetMembers { respond_to } => {
                    let _ = respond_to.send(Vec::new());
                }
                RoomMessage::Inbound { .. } | RoomMessage::Disconnected { .. } => {}
            }
        }

        debug!(
            target: "sig.actor.room",
            room = %self.target,
            instance = self.instance,
            "Room empty, closing"
        );

        if let Some(directory) = self.directory.upgrade() {
            let _ = directory
                .send(DirectoryMessage::RoomClosed {
                    target: self.target.clone(),
                    instance: self.instance,
                })
                .await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::connection::ConnectionActor;
    use axum::extract::ws::Message;
    use tokio_util::sync::PollSender;

    struct TestPeer {
        handle: ConnectionActorHandle,
        frames: mpsc::Receiver<Message>,
    }

    impl TestPeer {
        fn spawn(metrics: &Arc<ActorMetrics>) -> Self {
            Self::spawn_with(metrics, 16, 16)
        }

        fn spawn_with(metrics: &Arc<ActorMetrics>, queue: usize, sink: usize) -> Self {
            let (tx, frames) = mpsc::channel(sink);
            let (handle, _task) = ConnectionActor::spawn(
                ConnectionId::new(),
                PollSender::new(tx),
                CancellationToken::new(),
                queue,
                Arc::clone(metrics),
            );
            Self { handle, frames }
        }

        async fn recv(&mut self) -> serde_json::Value {
            loop {
                let frame = tokio::time::timeout(Duration::from_secs(1), self.frames.recv())
                    .await
                    .expect("frame in time")
                    .expect("sink open");
                if let Message::Text(text) = frame {
                    return serde_json::from_str(&text).unwrap();
                }
            }
        }

        async fn expect_silence(&mut self) {
            let result =
                tokio::time::timeout(Duration::from_millis(100), self.frames.recv()).await;
            assert!(result.is_err(), "unexpected frame: {result:?}");
        }
    }

    struct TestRoom {
        handle: RoomActorHandle,
        task: JoinHandle<()>,
        directory_rx: mpsc::Receiver<DirectoryMessage>,
        _directory_tx: mpsc::Sender<DirectoryMessage>,
        metrics: Arc<ActorMetrics>,
    }

    fn spawn_room(settings: RoomSettings) -> TestRoom {
        let (directory_tx, directory_rx) = mpsc::channel(8);
        let metrics = ActorMetrics::new();
        let (handle, task) = RoomActor::spawn(
            ConnectTarget::new("target-1"),
            7,
            settings,
            directory_tx.downgrade(),
            CancellationToken::new(),
            Arc::clone(&metrics),
        );
        TestRoom {
            handle,
            task,
            directory_rx,
            _directory_tx: directory_tx,
            metrics,
        }
    }

    fn pid(id: &str) -> ParticipantId {
        ParticipantId::new(id)
    }

    async fn join(room: &TestRoom, id: &str, peer: &TestPeer) -> JoinOutcome {
        room.handle.join(pid(id), peer.handle.clone()).await.unwrap()
    }

    async fn send(room: &TestRoom, id: &str, peer: &TestPeer, message: SignalMessage) {
        room.handle
            .inbound(pid(id), peer.handle.connection_id(), message)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_is_acknowledged_to_sender_only() {
        let room = spawn_room(RoomSettings::default());
        let metrics = Arc::clone(&room.metrics);
        let mut a = TestPeer::spawn(&metrics);
        let mut b = TestPeer::spawn(&metrics);

        assert_eq!(join(&room, "a", &a).await, JoinOutcome::Joined);
        assert_eq!(join(&room, "b", &b).await, JoinOutcome::Joined);

        send(&room, "b", &b, SignalMessage::presence(pid("b"))).await;

        let ack = b.recv().await;
        assert_eq!(ack["type"], "session_joined");
        assert_eq!(ack["participantId"], "b");
        a.expect_silence().await;
    }

    #[tokio::test]
    async fn test_connect_announces_when_enabled() {
        let room = spawn_room(RoomSettings {
            announce_joins: true,
            ..RoomSettings::default()
        });
        let metrics = Arc::clone(&room.metrics);
        let mut a = TestPeer::spawn(&metrics);
        let mut b = TestPeer::spawn(&metrics);
        join(&room, "a", &a).await;
        join(&room, "b", &b).await;

        send(&room, "b", &b, SignalMessage::presence(pid("b"))).await;

        assert_eq!(b.recv().await["type"], "session_joined");
        let notice = a.recv().await;
        assert_eq!(notice["type"], "connect");
        assert_eq!(notice["participantId"], "b");
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let room = spawn_room(RoomSettings::default());
        let metrics = Arc::clone(&room.metrics);
        let mut a = TestPeer::spawn(&metrics);
        let mut b = TestPeer::spawn(&metrics);
        let mut c = TestPeer::spawn(&metrics);
        join(&room, "a", &a).await;
        join(&room, "b", &b).await;
        join(&room, "c", &c).await;

        let offer = SignalMessage::new(MessageKind::Offer, pid("a"), "X");
        send(&room, "a", &a, offer).await;

        for peer in [&mut b, &mut c] {
            let frame = peer.recv().await;
            assert_eq!(frame["type"], "offer");
            assert_eq!(frame["payload"], "X");
        }
        a.expect_silence().await;
    }

    #[tokio::test]
    async fn test_targeted_delivery() {
        let room = spawn_room(RoomSettings::default());
        let metrics = Arc::clone(&room.metrics);
        let mut a = TestPeer::spawn(&metrics);
        let mut b = TestPeer::spawn(&metrics);
        let mut c = TestPeer::spawn(&metrics);
        join(&room, "a", &a).await;
        join(&room, "b", &b).await;
        join(&room, "c", &c).await;

        let answer = SignalMessage::new(MessageKind::Answer, pid("a"), "sdp").to(pid("c"));
        send(&room, "a", &a, answer).await;

        let frame = c.recv().await;
        assert_eq!(frame["type"], "answer");
        assert_eq!(frame["to"], "c");
        b.expect_silence().await;
        a.expect_silence().await;
    }

    #[tokio::test]
    async fn test_self_and_unknown_targets_are_dropped() {
        let room = spawn_room(RoomSettings::default());
        let metrics = Arc::clone(&room.metrics);
        let mut a = TestPeer::spawn(&metrics);
        let mut b = TestPeer::spawn(&metrics);
        join(&room, "a", &a).await;
        join(&room, "b", &b).await;

        let to_self = SignalMessage::new(MessageKind::Candidate, pid("a"), "c1").to(pid("a"));
        let to_ghost = SignalMessage::new(MessageKind::Candidate, pid("a"), "c2").to(pid("z"));
        send(&room, "a", &a, to_self).await;
        send(&room, "a", &a, to_ghost).await;

        a.expect_silence().await;
        b.expect_silence().await;
    }

    #[tokio::test]
    async fn test_leave_forwards_then_removes() {
        let room = spawn_room(RoomSettings::default());
        let metrics = Arc::clone(&room.metrics);
        let a = TestPeer::spawn(&metrics);
        let mut b = TestPeer::spawn(&metrics);
        let mut c = TestPeer::spawn(&metrics);
        join(&room, "a", &a).await;
        join(&room, "b", &b).await;
        join(&room, "c", &c).await;

        // A stray `to` does not narrow a departure.
        let leave = SignalMessage::new(MessageKind::Leave, pid("a"), "bye-reason").to(pid("b"));
        send(&room, "a", &a, leave).await;

        for peer in [&mut b, &mut c] {
            let notice = peer.recv().await;
            assert_eq!(notice["type"], "leave");
            assert_eq!(notice["participantId"], "a");
            assert_eq!(notice["payload"], "bye-reason");
            assert!(notice.get("to").is_none());
        }
        assert_eq!(room.handle.members().await.unwrap(), vec![pid("b"), pid("c")]);

        // A late disconnect from the departed connection is not a second leave.
        room.handle
            .disconnected(pid("a"), a.handle.connection_id())
            .await
            .unwrap();
        b.expect_silence().await;
    }

    #[tokio::test]
    async fn test_disconnect_notifies_remaining_members() {
        let room = spawn_room(RoomSettings::default());
        let metrics = Arc::clone(&room.metrics);
        let a = TestPeer::spawn(&metrics);
        let mut b = TestPeer::spawn(&metrics);
        join(&room, "a", &a).await;
        join(&room, "b", &b).await;

        room.handle
            .disconnected(pid("a"), a.handle.connection_id())
            .await
            .unwrap();

        let notice = b.recv().await;
        assert_eq!(notice["type"], "leave");
        assert_eq!(notice["participantId"], "a");
        assert_eq!(room.handle.member_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_participant_replaces_binding() {
        let room = spawn_room(RoomSettings::default());
        let metrics = Arc::clone(&room.metrics);
        let mut first = TestPeer::spawn(&metrics);
        let second = TestPeer::spawn(&metrics);
        let mut b = TestPeer::spawn(&metrics);
        join(&room, "a", &first).await;
        join(&room, "b", &b).await;

        assert_eq!(join(&room, "a", &first).await, JoinOutcome::AlreadyMember);
        assert_eq!(join(&room, "a", &second).await, JoinOutcome::Replaced);

        match tokio::time::timeout(Duration::from_secs(1), first.frames.recv())
            .await
            .unwrap()
        {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, REPLACED_CLOSE_CODE),
            other => panic!("expected close frame, got {other:?}"),
        }

        // The stale connection's cleanup must not remove the new binding.
        room.handle
            .disconnected(pid("a"), first.handle.connection_id())
            .await
            .unwrap();
        b.expect_silence().await;
        assert_eq!(room.handle.member_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_messages_from_unbound_connection_are_dropped() {
        let room = spawn_room(RoomSettings::default());
        let metrics = Arc::clone(&room.metrics);
        let a = TestPeer::spawn(&metrics);
        let stranger = TestPeer::spawn(&metrics);
        let mut b = TestPeer::spawn(&metrics);
        join(&room, "a", &a).await;
        join(&room, "b", &b).await;

        let forged = SignalMessage::new(MessageKind::Offer, pid("a"), "forged");
        send(&room, "a", &stranger, forged).await;

        b.expect_silence().await;
    }

    #[tokio::test]
    async fn test_slow_peer_is_evicted() {
        let room = spawn_room(RoomSettings {
            slow_peer_strikes: 3,
            announce_joins: false,
        });
        let metrics = Arc::clone(&room.metrics);
        let mut a = TestPeer::spawn(&metrics);
        // Nobody reads this sink, so its writer stalls after one frame.
        let slow = TestPeer::spawn_with(&metrics, 1, 1);
        join(&room, "a", &a).await;
        join(&room, "slow", &slow).await;

        for i in 0..20 {
            let offer = SignalMessage::new(MessageKind::Offer, pid("a"), i.to_string());
            send(&room, "a", &a, offer).await;
        }

        let notice = a.recv().await;
        assert_eq!(notice["type"], "leave");
        assert_eq!(notice["participantId"], "slow");
        assert_eq!(room.handle.members().await.unwrap(), vec![pid("a")]);
        assert!(slow.handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_closed_peer_is_removed_on_delivery() {
        let room = spawn_room(RoomSettings::default());
        let metrics = Arc::clone(&room.metrics);
        let mut a = TestPeer::spawn(&metrics);
        let gone = TestPeer::spawn(&metrics);
        join(&room, "a", &a).await;
        join(&room, "gone", &gone).await;

        gone.handle.cancel();
        while !gone.handle.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let offer = SignalMessage::new(MessageKind::Offer, pid("a"), "X");
        send(&room, "a", &a, offer).await;

        let notice = a.recv().await;
        assert_eq!(notice["type"], "leave");
        assert_eq!(notice["participantId"], "gone");
    }

    #[tokio::test]
    async fn test_room_closes_when_last_member_leaves() {
        let mut room = spawn_room(RoomSettings::default());
        let metrics = Arc::clone(&room.metrics);
        let a = TestPeer::spawn(&metrics);
        join(&room, "a", &a).await;
        assert_eq!(metrics.room_count(), 1);

        send(&room, "a", &a, SignalMessage::leave(pid("a"))).await;

        match tokio::time::timeout(Duration::from_secs(1), room.directory_rx.recv())
            .await
            .unwrap()
        {
            Some(DirectoryMessage::RoomClosed { target, instance }) => {
                assert_eq!(target.as_str(), "target-1");
                assert_eq!(instance, 7);
            }
            other => panic!("expected RoomClosed, got {other:?}"),
        }

        tokio::time::timeout(Duration::from_secs(1), &mut room.task)
            .await
            .unwrap()
            .unwrap();
        assert!(room.handle.is_closed());
        assert_eq!(metrics.room_count(), 0);

        let late = TestPeer::spawn(&metrics);
        assert!(matches!(
            room.handle.join(pid("b"), late.handle.clone()).await,
            Err(SignalError::RoomClosed)
        ));
    }

    #[tokio::test]
    async fn test_cancel_closes_member_connections() {
        let room = spawn_room(RoomSettings::default());
        let metrics = Arc::clone(&room.metrics);
        let a = TestPeer::spawn(&metrics);
        join(&room, "a", &a).await;

        room.handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), room.task)
            .await
            .unwrap()
            .unwrap();

        assert!(a.handle.is_cancelled());
        assert_eq!(metrics.participant_count(), 0);
    }
}
