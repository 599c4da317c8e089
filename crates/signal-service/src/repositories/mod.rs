//! Session persistence.

pub mod memory;
pub mod sessions;

pub use memory::InMemorySessionStore;
pub use sessions::{PgSessionStore, SessionStore};
