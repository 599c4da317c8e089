//! Actor metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Directory  | < 100  | 100-500 | > 500    |
//! | Room       | < 100  | 100-500 | > 500    |
//! | Connection | < 32   | 32-128  | > 128    |
//!
//! In-process counters live in `ActorMetrics`; each update is mirrored to
//! the Prometheus gauges in `observability::metrics`.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the directory and room actors.
pub const ROOM_MAILBOX_NORMAL: usize = 100;
pub const ROOM_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for connection actors.
pub const CONNECTION_MAILBOX_NORMAL: usize = 32;
pub const CONNECTION_MAILBOX_WARNING: usize = 128;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// RoomDirectoryActor (singleton).
    Directory,
    /// RoomActor (one per connect target).
    Room,
    /// ConnectionActor (one per relay connection).
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Directory => "directory",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Directory | ActorType::Room => ROOM_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Directory | ActorType::Room => ROOM_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth and throughput for one actor.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Room target, connection id, etc.
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Record the backlog seen when a message is taken off the mailbox.
    ///
    /// `depth` counts the message being handled plus everything still
    /// queued behind it.
    pub fn record_depth(&self, depth: usize) {
        let previous = self.depth.swap(depth, Ordering::Relaxed);
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);

        match self.level_for_depth(depth) {
            MailboxLevel::Critical => {
                warn!(
                    target: "sig.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth,
                    threshold = self.actor_type.warning_threshold(),
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning if self.level_for_depth(previous) == MailboxLevel::Normal => {
                debug!(
                    target: "sig.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// Record that the message taken with `record_depth` was handled.
    pub fn record_dequeue(&self) {
        // Saturate so an unmatched dequeue can never wrap.
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message dropped due to backpressure.
    pub fn record_drop(&self) {
        let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            target: "sig.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            actor_id = %self.actor_id,
            dropped,
            "Message dropped due to backpressure"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated counters for the actor system.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    pub active_rooms: AtomicUsize,
    pub active_connections: AtomicUsize,
    pub active_participants: AtomicUsize,
    /// Total actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        let rooms = self.active_rooms.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_active_rooms(rooms);
    }

    pub fn room_removed(&self) {
        let previous = self
            .active_rooms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        prom::set_active_rooms(previous.saturating_sub(1));
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        prom::connection_opened();
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        prom::connection_closed();
    }

    pub fn participant_joined(&self) {
        self.active_participants.fetch_add(1, Ordering::Relaxed);
        prom::participant_joined();
    }

    pub fn participant_left(&self) {
        self.active_participants.fetch_sub(1, Ordering::Relaxed);
        prom::participant_left();
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::error!(
            target: "sig.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.active_participants.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_labels_and_thresholds() {
        assert_eq!(ActorType::Directory.as_str(), "directory");
        assert_eq!(ActorType::Room.as_str(), "room");
        assert_eq!(ActorType::Connection.as_str(), "connection");
        assert_eq!(ActorType::Room.normal_threshold(), 100);
        assert_eq!(ActorType::Room.warning_threshold(), 500);
        assert_eq!(ActorType::Connection.normal_threshold(), 32);
        assert_eq!(ActorType::Connection.warning_threshold(), 128);
    }

    #[test]
    fn test_mailbox_depth_tracks_peak() {
        let monitor = MailboxMonitor::new(ActorType::Room, "room-a");

        monitor.record_depth(3);
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.messages_processed(), 1);

        monitor.record_depth(1);
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 2);
    }

    #[test]
    fn test_mailbox_levels() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn-1");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.record_depth(40);
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        monitor.record_depth(140);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);

        monitor.record_depth(1);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
    }

    #[test]
    fn test_dequeue_never_underflows() {
        let monitor = MailboxMonitor::new(ActorType::Directory, "directory");
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_record_drop_counts() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn-1");
        monitor.record_drop();
        monitor.record_drop();
        assert_eq!(monitor.messages_dropped(), 2);
    }

    #[test]
    fn test_actor_metrics_counts() {
        let metrics = ActorMetrics::new();

        metrics.room_created();
        metrics.room_created();
        metrics.room_removed();
        assert_eq!(metrics.room_count(), 1);

        metrics.connection_opened();
        metrics.participant_joined();
        metrics.participant_joined();
        metrics.participant_left();
        assert_eq!(metrics.connection_count(), 1);
        assert_eq!(metrics.participant_count(), 1);

        metrics.record_panic(ActorType::Room);
        assert_eq!(metrics.actor_panics.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_room_removed_saturates() {
        let metrics = ActorMetrics::new();
        metrics.room_removed();
        assert_eq!(metrics.room_count(), 0);
    }
}
