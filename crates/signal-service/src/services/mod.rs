//! Service layer for the Session API.

pub mod session_registry;

pub use session_registry::{CreatedSession, JoinGrant, SessionRegistry};
