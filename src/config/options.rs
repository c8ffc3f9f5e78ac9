//! Runtime options for pools, gateways, and listeners.
//!
//! Options are plain structs with builder-style setters and a `validate`
//! step; constructors in the rest of the crate validate before use.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tcp_gateway::{AcquirePolicy, PoolOptions};
//!
//! let options = PoolOptions::new()
//!     .with_capacity(4)
//!     .with_acquire_policy(AcquirePolicy::FailFast)
//!     .with_idle_timeout(Duration::from_secs(30));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

// ============================================================================
// Constants
// ============================================================================

/// Default number of pooled connections per endpoint.
pub const DEFAULT_POOL_CAPACITY: usize = 10;

/// Default time an idle pooled connection is kept.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default end-to-end request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default server-side handler timeout.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on writing one reply frame.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// AcquirePolicy
// ============================================================================

/// Behavior of [`crate::ConnectionPool::acquire`] when every slot is busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquirePolicy {
    /// Wait for a connection to be released, bounded by the caller's deadline.
    #[default]
    Wait,
    /// Fail immediately with [`Error::PoolExhausted`].
    FailFast,
}

// ============================================================================
// PoolOptions
// ============================================================================

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum number of live connections.
    pub capacity: usize,

    /// What `acquire` does at capacity.
    pub acquire_policy: AcquirePolicy,

    /// Idle connections older than this are evicted. `None` keeps them forever.
    pub idle_timeout: Option<Duration>,

    /// Upper bound on a single TCP connect.
    pub connect_timeout: Duration,

    /// Maximum frame payload in either direction.
    pub max_frame_size: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
            acquire_policy: AcquirePolicy::Wait,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Sets the pool capacity.
    #[inline]
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the at-capacity policy.
    #[inline]
    #[must_use]
    pub fn with_acquire_policy(mut self, policy: AcquirePolicy) -> Self {
        self.acquire_policy = policy;
        self
    }

    /// Sets the idle eviction threshold.
    #[inline]
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Disables idle eviction.
    #[inline]
    #[must_use]
    pub fn without_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }

    /// Sets the TCP connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets the maximum frame payload.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero capacity, frame size, or timeout.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::config("Pool capacity must be greater than zero"));
        }
        if self.max_frame_size == 0 {
            return Err(Error::config("Max frame size must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("Connect timeout must be greater than zero"));
        }
        if self.idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config("Idle timeout must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// GatewayOptions
// ============================================================================

/// Outbound gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOptions {
    /// Deadline applied to `send`, covering pool acquire and reply wait.
    pub request_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero request timeout.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::config("Request timeout must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// ServerOptions
// ============================================================================

/// Listener and inbound gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Maximum frame payload in either direction.
    pub max_frame_size: usize,

    /// Upper bound on a single handler invocation.
    pub handler_timeout: Duration,

    /// Upper bound on writing a single reply to a slow or stalled reader.
    pub write_timeout: Duration,

    /// Write the error text back as a reply before closing on handler failure.
    ///
    /// The client cannot tell this frame from a normal reply; it is meant
    /// for peers that parse their replies.
    pub error_replies: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            error_replies: true,
        }
    }

    /// Sets the maximum frame payload.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Sets the handler timeout.
    #[inline]
    #[must_use]
    pub fn with_handler_timeout(mut self, handler_timeout: Duration) -> Self {
        self.handler_timeout = handler_timeout;
        self
    }

    /// Sets the reply write timeout.
    #[inline]
    #[must_use]
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Enables or disables error replies.
    #[inline]
    #[must_use]
    pub fn with_error_replies(mut self, enabled: bool) -> Self {
        self.error_replies = enabled;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero frame size or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            return Err(Error::config("Max frame size must be greater than zero"));
        }
        if self.handler_timeout.is_zero() {
            return Err(Error::config("Handler timeout must be greater than zero"));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::config("Write timeout must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults() {
        let options = PoolOptions::default();
        assert_eq!(options.capacity, DEFAULT_POOL_CAPACITY);
        assert_eq!(options.acquire_policy, AcquirePolicy::Wait);
        assert_eq!(options.idle_timeout, Some(DEFAULT_IDLE_TIMEOUT));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_pool_builder_chain() {
        let options = PoolOptions::new()
            .with_capacity(2)
            .with_acquire_policy(AcquirePolicy::FailFast)
            .without_idle_timeout()
            .with_max_frame_size(1024);

        assert_eq!(options.capacity, 2);
        assert_eq!(options.acquire_policy, AcquirePolicy::FailFast);
        assert_eq!(options.idle_timeout, None);
        assert_eq!(options.max_frame_size, 1024);
    }

    #[test]
    fn test_pool_validation() {
        assert!(PoolOptions::new().with_capacity(0).validate().is_err());
        assert!(PoolOptions::new().with_max_frame_size(0).validate().is_err());
        assert!(
            PoolOptions::new()
                .with_idle_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_gateway_validation() {
        assert!(GatewayOptions::new().validate().is_ok());
        assert!(
            GatewayOptions::new()
                .with_request_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_server_defaults_and_validation() {
        let options = ServerOptions::default();
        assert!(options.error_replies);
        assert!(options.validate().is_ok());
        assert_eq!(options.write_timeout, DEFAULT_WRITE_TIMEOUT);
        assert!(
            options
                .clone()
                .with_handler_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            options
                .with_write_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_acquire_policy_serde() {
        let policy: AcquirePolicy = serde_json::from_str("\"fail_fast\"").expect("parse");
        assert_eq!(policy, AcquirePolicy::FailFast);
    }
}
