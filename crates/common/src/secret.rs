//! Secret wrappers for room passwords.
//!
//! Room passwords arrive in clear over the Session API and must never reach a
//! log line or a persisted record. Wrapping them in [`SecretString`] as soon as
//! they are deserialized means any `Debug` derive on a request body or a
//! registry input prints `[REDACTED]` instead of the password.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct JoinBody {
//!     password: SecretString,
//! }
//!
//! let body: JoinBody = serde_json::from_str(r#"{"password": "p1"}"#).unwrap();
//! assert!(!format!("{body:?}").contains("p1"));
//! assert_eq!(body.password.expose_secret(), "p1");
//! ```
//!
//! The clear value is only reachable through `expose_secret()`, which keeps
//! every place that touches it greppable (hashing, verification, and legacy
//! token derivation).

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
