//! Test utilities for the signal service.
//!
//! - [`TestSignalServer`]: the full router on an ephemeral port, backed by
//!   the in-memory session store
//! - [`WsClient`]: a relay websocket client with timeout-bounded receives
//! - [`SessionClient`]: typed wrappers over the session HTTP API

pub mod server_harness;
pub mod session_client;
pub mod ws_client;

pub use server_harness::*;
pub use session_client::*;
pub use ws_client::*;
