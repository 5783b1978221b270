//! Service configuration.
//!
//! Configuration is loaded from environment variables, falling back to
//! defaults for anything unset.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::peer::PeerConfig;

/// Default HTTP bind address.
pub const DEFAULT_LISTEN_WEB_ADDRESS: &str = "0.0.0.0:8080";

/// Default number of events each room keeps in memory.
pub const DEFAULT_EVENT_BUFFER_CAPACITY: usize = 30;

/// Default period between idle room collections.
pub const DEFAULT_EVENT_GC_PERIOD_SECONDS: u64 = 60;

/// Default period between downlink pings.
pub const DEFAULT_PEER_PING_INTERVAL_SECONDS: u64 = 60;

/// Default time a downlink ping may take.
pub const DEFAULT_PEER_PING_TIMEOUT_SECONDS: u64 = 20;

/// Default time granted to in-flight work on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 60;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogFormat {
    #[default]
    Console,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:8080").
    pub listen_web_address: String,

    /// Events retained per room (default: 30).
    pub event_buffer_capacity: usize,

    /// Idle room collection period (default: 60s).
    pub event_gc_period: Duration,

    pub peer_ping_interval: Duration,

    pub peer_ping_timeout: Duration,

    /// Grace period for rooms and peers to wind down (default: 60s).
    pub shutdown_timeout: Duration,

    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let listen_web_address = vars
            .get("LISTEN_WEB_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LISTEN_WEB_ADDRESS.to_string());

        let event_buffer_capacity =
            parse_positive(vars, "EVENT_BUFFER_CAPACITY", DEFAULT_EVENT_BUFFER_CAPACITY)?;

        let event_gc_period = Duration::from_secs(parse_positive(
            vars,
            "EVENT_GC_PERIOD_SECONDS",
            DEFAULT_EVENT_GC_PERIOD_SECONDS,
        )?);

        let peer_ping_interval = Duration::from_secs(parse_positive(
            vars,
            "PEER_PING_INTERVAL_SECONDS",
            DEFAULT_PEER_PING_INTERVAL_SECONDS,
        )?);

        let peer_ping_timeout = Duration::from_secs(parse_positive(
            vars,
            "PEER_PING_TIMEOUT_SECONDS",
            DEFAULT_PEER_PING_TIMEOUT_SECONDS,
        )?);

        let shutdown_timeout = Duration::from_secs(parse_positive(
            vars,
            "SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        )?);

        let log_format = match vars.get("LOG_FORMAT") {
            Some(value) => LogFormat::from_str(value).map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "LOG_FORMAT must be 'console' or 'json', got '{value}'"
                ))
            })?,
            None => LogFormat::default(),
        };

        Ok(Config {
            listen_web_address,
            event_buffer_capacity,
            event_gc_period,
            peer_ping_interval,
            peer_ping_timeout,
            shutdown_timeout,
            log_format,
        })
    }

    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            ping_interval: self.peer_ping_interval,
            ping_timeout: self.peer_ping_timeout,
        }
    }
}

fn parse_positive<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };
    match raw.parse::<T>() {
        Ok(value) if value != T::default() => Ok(value),
        _ => Err(ConfigError::InvalidValue(format!(
            "{key} must be a positive integer, got '{raw}'"
        ))),
    }
}
