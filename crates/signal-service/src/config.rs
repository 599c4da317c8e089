//! Signal service configuration.
//!
//! Configuration is loaded from environment variables. The database URL is
//! redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default bcrypt cost factor for room passwords.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Minimum bcrypt cost accepted from configuration.
pub const MIN_CONFIG_BCRYPT_COST: u32 = 10;

/// Maximum bcrypt cost accepted from configuration.
pub const MAX_CONFIG_BCRYPT_COST: u32 = 14;

/// Default service name reported by `/health`.
pub const DEFAULT_SERVICE_NAME: &str = "signal-service";

/// Default minimum room password length, in characters.
pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 1;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Default number of consecutive dropped deliveries before a peer is evicted.
pub const DEFAULT_SLOW_PEER_STRIKES: u32 = 3;

/// Default drain period after a shutdown signal, in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 5;

/// How room handles and connect targets are produced at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenStrategy {
    /// Independent random tokens (default).
    #[default]
    Random,
    /// Legacy deterministic digests of the creation inputs.
    Derived,
}

impl TokenStrategy {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "random" => Ok(TokenStrategy::Random),
            "derived" => Ok(TokenStrategy::Derived),
            other => Err(ConfigError::InvalidTokenStrategy(format!(
                "TOKEN_STRATEGY must be 'random' or 'derived', got '{}'",
                other
            ))),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Signal service configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// PostgreSQL connection URL. When absent, sessions are kept in memory.
    pub database_url: Option<String>,

    /// bcrypt cost factor for room passwords (10-14).
    pub bcrypt_cost: u32,

    /// Room token generation strategy.
    pub token_strategy: TokenStrategy,

    /// Name reported by the liveness endpoint.
    pub service_name: String,

    /// Minimum accepted password length at session creation.
    pub min_password_length: usize,

    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,

    /// Consecutive full-queue drops before a slow peer is evicted.
    pub slow_peer_strikes: u32,

    /// Whether `connect` also announces the newcomer to existing members.
    pub announce_joins: bool,

    /// Drain period after a shutdown signal, in seconds.
    pub drain_seconds: u64,

    /// Log output format.
    pub log_format: LogFormat,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("token_strategy", &self.token_strategy)
            .field("service_name", &self.service_name)
            .field("min_password_length", &self.min_password_length)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("slow_peer_strikes", &self.slow_peer_strikes)
            .field("announce_joins", &self.announce_joins)
            .field("drain_seconds", &self.drain_seconds)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid bcrypt cost configuration: {0}")]
    InvalidBcryptCost(String),

    #[error("Invalid token strategy configuration: {0}")]
    InvalidTokenStrategy(String),

    #[error("Invalid relay configuration: {0}")]
    InvalidRelaySetting(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let database_url = vars
            .get("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .cloned();

        let bcrypt_cost = if let Some(value_str) = vars.get("BCRYPT_COST") {
            let value: u32 = value_str.parse().map_err(|e| {
                ConfigError::InvalidBcryptCost(format!(
                    "BCRYPT_COST must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if !(MIN_CONFIG_BCRYPT_COST..=MAX_CONFIG_BCRYPT_COST).contains(&value) {
                return Err(ConfigError::InvalidBcryptCost(format!(
                    "BCRYPT_COST must be between {} and {}, got {}",
                    MIN_CONFIG_BCRYPT_COST, MAX_CONFIG_BCRYPT_COST, value
                )));
            }

            value
        } else {
            DEFAULT_BCRYPT_COST
        };

        let token_strategy = match vars.get("TOKEN_STRATEGY") {
            Some(value) => TokenStrategy::parse(value)?,
            None => TokenStrategy::default(),
        };

        let service_name = vars
            .get("SERVICE_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());
        if service_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVICE_NAME must not be empty".to_string(),
            ));
        }

        let min_password_length =
            parse_positive(vars, "MIN_PASSWORD_LENGTH", DEFAULT_MIN_PASSWORD_LENGTH)
                .map_err(ConfigError::InvalidValue)?;

        let outbound_queue_capacity = parse_positive(
            vars,
            "OUTBOUND_QUEUE_CAPACITY",
            DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        )
        .map_err(ConfigError::InvalidRelaySetting)?;

        let slow_peer_strikes =
            parse_positive(vars, "SLOW_PEER_STRIKES", DEFAULT_SLOW_PEER_STRIKES)
                .map_err(ConfigError::InvalidRelaySetting)?;

        let announce_joins = match vars.get("ANNOUNCE_JOINS") {
            Some(value) => value.parse::<bool>().map_err(|e| {
                ConfigError::InvalidRelaySetting(format!(
                    "ANNOUNCE_JOINS must be 'true' or 'false', got '{}': {}",
                    value, e
                ))
            })?,
            None => false,
        };

        let drain_seconds = match vars.get("DRAIN_SECONDS") {
            Some(value) => value.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "DRAIN_SECONDS must be a valid non-negative integer, got '{}': {}",
                    value, e
                ))
            })?,
            None => DEFAULT_DRAIN_SECONDS,
        };

        let log_format = match vars.get("LOG_FORMAT").map(|v| v.to_ascii_lowercase()) {
            None => LogFormat::Text,
            Some(v) if v == "text" => LogFormat::Text,
            Some(v) if v == "json" => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{}'",
                    other
                )))
            }
        };

        Ok(Config {
            bind_address,
            database_url,
            bcrypt_cost,
            token_strategy,
            service_name,
            min_password_length,
            outbound_queue_capacity,
            slow_peer_strikes,
            announce_joins,
            drain_seconds,
            log_format,
        })
    }
}

/// Parse an optional strictly positive integer variable.
fn parse_positive<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: fmt::Display,
{
    let Some(value_str) = vars.get(key) else {
        return Ok(default);
    };

    let value: T = value_str.parse().map_err(|e| {
        format!(
            "{} must be a valid positive integer, got '{}': {}",
            key, value_str, e
        )
    })?;

    if value == T::default() {
        return Err(format!("{} must be greater than 0", key));
    }

    Ok(value)
}
