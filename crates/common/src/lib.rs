//! Common utilities and types shared across the signalling relay crates.

#![warn(clippy::pedantic)]

/// Module for strongly typed identifiers and tokens
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
