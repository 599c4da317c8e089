//! Signal Service Library
//!
//! A signalling relay: participants discover each other inside a named,
//! password-protected room and exchange opaque negotiation messages
//! (offers, answers, candidates) needed to set up a direct peer link.
//! Payloads are relayed verbatim and never interpreted.
//!
//! # Architecture
//!
//! ```text
//! Session API (axum)
//! ├── SessionRegistry ── SessionStore (Postgres or in-memory)
//! │                   └─ CredentialStore (bcrypt) + TokenGenerator
//! └── /ws/:target ── RelayHub (one read loop per connection)
//!                    └── RoomDirectoryActor
//!                        └── RoomActor (one per connect target)
//!                            └── ConnectionActor (single writer per socket)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Room directory, rooms and connection writers
//! - [`signaling`] - Wire schema and the relay read loop
//! - [`services`] - Session registry operations
//! - [`repositories`] - Session persistence
//! - [`crypto`] - Password hashing and room token generation
//! - [`routes`], [`handlers`], [`middleware`] - HTTP surface
//! - [`config`], [`errors`], [`observability`] - Service plumbing

pub mod actors;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod signaling;
