//! HTTP request handlers for the signal service.

pub mod health;
pub mod metrics;
pub mod relay;
pub mod sessions;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use relay::relay_upgrade;
pub use sessions::{create_session, join_session, lookup_session};
