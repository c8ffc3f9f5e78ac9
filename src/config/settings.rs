//! Deployment settings for the client and server sides.
//!
//! Settings are flat, serializable records that can be read from JSON or
//! from environment variables and then converted into the option structs
//! the runtime types consume.
//!
//! # Environment Keys
//!
//! | Key | Side | Field |
//! |-----|------|-------|
//! | `TCP_SERVER_HOST` | client | `host` |
//! | `TCP_SERVER_PORT` | both | `port` |
//! | `TCP_CLIENT_POOL_SIZE` | client | `pool_size` |
//! | `TCP_CLIENT_REQUEST_TIMEOUT_MS` | client | `request_timeout_ms` |
//! | `TCP_CLIENT_IDLE_TIMEOUT_MS` | client | `idle_timeout_ms` (0 disables) |
//! | `TCP_CLIENT_CONNECT_TIMEOUT_MS` | client | `connect_timeout_ms` |
//! | `TCP_CLIENT_FAIL_FAST` | client | `fail_fast` |
//! | `TCP_MAX_FRAME_SIZE` | both | `max_frame_size` |
//! | `TCP_SERVER_BIND_HOST` | server | `bind_host` |
//! | `TCP_SERVER_HANDLER_TIMEOUT_MS` | server | `handler_timeout_ms` |
//! | `TCP_SERVER_WRITE_TIMEOUT_MS` | server | `write_timeout_ms` |
//! | `TCP_SERVER_ERROR_REPLIES` | server | `error_replies` |

// ============================================================================
// Imports
// ============================================================================

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::Endpoint;

use super::options::{
    AcquirePolicy, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDLER_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_POOL_CAPACITY, DEFAULT_REQUEST_TIMEOUT, DEFAULT_WRITE_TIMEOUT, GatewayOptions,
    PoolOptions, ServerOptions,
};

// ============================================================================
// Constants
// ============================================================================

/// Default server port when none is configured.
pub const DEFAULT_PORT: u16 = 9000;

// ============================================================================
// ClientConfig
// ============================================================================

/// Client-side settings: target endpoint, pool, and gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host to connect to.
    pub host: String,
    /// Server port to connect to.
    pub port: u16,
    /// Pool capacity.
    pub pool_size: usize,
    /// End-to-end request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Idle eviction threshold in milliseconds; 0 disables eviction.
    pub idle_timeout_ms: u64,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum frame payload in bytes.
    pub max_frame_size: usize,
    /// Fail fast instead of waiting when the pool is exhausted.
    pub fail_fast: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            pool_size: DEFAULT_POOL_CAPACITY,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT.as_millis() as u64,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            fail_fast: false,
        }
    }
}

impl ClientConfig {
    /// Parses settings from a JSON document. Missing fields keep defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on malformed input and [`Error::Config`] on
    /// invalid values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is present but invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("TCP_SERVER_HOST") {
            config.host = host;
        }
        set_parsed(&lookup, "TCP_SERVER_PORT", &mut config.port)?;
        set_parsed(&lookup, "TCP_CLIENT_POOL_SIZE", &mut config.pool_size)?;
        set_parsed(&lookup, "TCP_CLIENT_REQUEST_TIMEOUT_MS", &mut config.request_timeout_ms)?;
        set_parsed(&lookup, "TCP_CLIENT_IDLE_TIMEOUT_MS", &mut config.idle_timeout_ms)?;
        set_parsed(&lookup, "TCP_CLIENT_CONNECT_TIMEOUT_MS", &mut config.connect_timeout_ms)?;
        set_parsed(&lookup, "TCP_MAX_FRAME_SIZE", &mut config.max_frame_size)?;
        set_bool(&lookup, "TCP_CLIENT_FAIL_FAST", &mut config.fail_fast)?;

        config.validate()?;
        Ok(config)
    }

    /// Returns the remote endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Converts into pool options.
    #[must_use]
    pub fn pool_options(&self) -> PoolOptions {
        let policy = if self.fail_fast {
            AcquirePolicy::FailFast
        } else {
            AcquirePolicy::Wait
        };

        let options = PoolOptions::new()
            .with_capacity(self.pool_size)
            .with_acquire_policy(policy)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_max_frame_size(self.max_frame_size);

        match self.idle_timeout_ms {
            0 => options.without_idle_timeout(),
            ms => options.with_idle_timeout(Duration::from_millis(ms)),
        }
    }

    /// Converts into gateway options.
    #[must_use]
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions::new().with_request_timeout(Duration::from_millis(self.request_timeout_ms))
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any derived option is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::config("Server host must not be empty"));
        }
        self.pool_options().validate()?;
        self.gateway_options().validate()
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

/// Server-side settings: bind address and listener behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener to.
    pub bind_host: String,
    /// Port to listen on (0 picks a free port).
    pub port: u16,
    /// Maximum frame payload in bytes.
    pub max_frame_size: usize,
    /// Handler timeout in milliseconds.
    pub handler_timeout_ms: u64,
    /// Reply write timeout in milliseconds.
    pub write_timeout_ms: u64,
    /// Reply with the error text before closing on handler failure.
    pub error_replies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handler_timeout_ms: DEFAULT_HANDLER_TIMEOUT.as_millis() as u64,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
            error_replies: true,
        }
    }
}

impl ServerConfig {
    /// Parses settings from a JSON document. Missing fields keep defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on malformed input and [`Error::Config`] on
    /// invalid values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is present but invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a value is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("TCP_SERVER_BIND_HOST") {
            config.bind_host = host;
        }
        set_parsed(&lookup, "TCP_SERVER_PORT", &mut config.port)?;
        set_parsed(&lookup, "TCP_MAX_FRAME_SIZE", &mut config.max_frame_size)?;
        set_parsed(&lookup, "TCP_SERVER_HANDLER_TIMEOUT_MS", &mut config.handler_timeout_ms)?;
        set_parsed(&lookup, "TCP_SERVER_WRITE_TIMEOUT_MS", &mut config.write_timeout_ms)?;
        set_bool(&lookup, "TCP_SERVER_ERROR_REPLIES", &mut config.error_replies)?;

        config.validate()?;
        Ok(config)
    }

    /// Returns the `host:port` string to bind.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        Endpoint::new(self.bind_host.clone(), self.port).to_string()
    }

    /// Converts into server options.
    #[must_use]
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions::new()
            .with_max_frame_size(self.max_frame_size)
            .with_handler_timeout(Duration::from_millis(self.handler_timeout_ms))
            .with_write_timeout(Duration::from_millis(self.write_timeout_ms))
            .with_error_replies(self.error_replies)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any derived option is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.bind_host.is_empty() {
            return Err(Error::config("Bind host must not be empty"));
        }
        self.server_options().validate()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Overwrites `slot` with the parsed value of `key`, if present.
fn set_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("{key}='{raw}' is invalid: {e}")))?;
    }
    Ok(())
}

/// Overwrites `slot` with a boolean flag (`true/false/1/0/yes/no`), if present.
fn set_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) -> Result<()> {
    if let Some(raw) = lookup(key) {
        *slot = match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => {
                return Err(Error::config(format!(
                    "{key}='{raw}' is invalid: expected a boolean"
                )));
            }
        };
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
