//! Relay wire format and connection handling.

pub mod hub;
pub mod wire;

pub use hub::RelayHub;
pub use wire::{MessageKind, SignalMessage};
