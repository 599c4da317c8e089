//! Actor hierarchy for the relay.
//!
//! ```text
//! RoomDirectoryActor (singleton)
//! └── RoomActor (one per connect target with live members)
//!     └── ConnectionActorHandle per member
//!         └── ConnectionActor (single writer for one websocket)
//! ```
//!
//! All room state is owned by its `RoomActor`; other components reach it
//! only through handles and typed messages.

pub mod connection;
pub mod directory;
pub mod messages;
pub mod metrics;
pub mod room;

pub use connection::{ConnectionActor, ConnectionActorHandle, DeliveryError};
pub use directory::RoomDirectoryHandle;
pub use messages::{DirectoryStatus, JoinOutcome};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use room::{RoomActorHandle, RoomSettings};
