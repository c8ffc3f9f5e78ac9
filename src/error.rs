//! Error types for the TCP gateway.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use tcp_gateway::{OutboundGateway, Result};
//!
//! async fn example(gateway: &OutboundGateway) -> Result<()> {
//!     let reply = gateway.send("hello").await?;
//!     println!("{} bytes back", reply.len());
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connect`], [`Error::ConnectionClosed`] |
//! | Deadline | [`Error::Timeout`] |
//! | Protocol | [`Error::FrameTooLarge`], [`Error::Protocol`] |
//! | Pool | [`Error::PoolExhausted`], [`Error::PoolClosed`] |
//! | Server | [`Error::Handler`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::transport::Endpoint;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

/// Boxed error returned by application handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when options or settings are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// TCP connection could not be established.
    #[error("Failed to connect to {endpoint}: {message}")]
    Connect {
        /// Remote endpoint that was dialed.
        endpoint: Endpoint,
        /// Description of the failure.
        message: String,
    },

    /// Connection closed by the peer, reset, or shut down locally.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Deadline Errors
    // ========================================================================
    /// Deadline exceeded while waiting for a pool slot or a reply.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Frame length exceeds the configured maximum.
    #[error("Frame of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Announced or attempted frame length.
        size: usize,
        /// Configured maximum frame size.
        max: usize,
    },

    /// Protocol violation on the wire or in connection usage.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Pool Errors
    // ========================================================================
    /// All pool slots are busy and the pool is configured to fail fast.
    #[error("Connection pool exhausted ({capacity} connections busy)")]
    PoolExhausted {
        /// Pool capacity.
        capacity: usize,
    },

    /// The pool was closed; no further connections are handed out.
    #[error("Connection pool closed")]
    PoolClosed,

    // ========================================================================
    // Server Errors
    // ========================================================================
    /// The application handler failed while processing a request.
    #[error("Handler error: {message}")]
    Handler {
        /// Error reported by the handler.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<RecvError> for Error {
    fn from(_: RecvError) -> Self {
        Self::ConnectionClosed
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connect error for the given endpoint.
    #[inline]
    pub fn connect(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self::Connect {
            endpoint,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a frame too large error.
    #[inline]
    pub fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a pool exhausted error.
    #[inline]
    pub fn pool_exhausted(capacity: usize) -> Self {
        Self::PoolExhausted { capacity }
    }

    /// Wraps an application handler error.
    #[inline]
    pub fn handler(err: impl std::fmt::Display) -> Self {
        Self::Handler {
            message: err.to_string(),
        }
    }

    /// Classifies an I/O error observed on a live socket.
    ///
    /// Peer resets and truncated streams become [`Error::ConnectionClosed`];
    /// anything else stays [`Error::Io`].
    #[must_use]
    pub fn from_socket(err: IoError) -> Self {
        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected => Self::ConnectionClosed,
            _ => Self::Io(err),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the wire stream was malformed or oversized.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. } | Self::Protocol { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::ConnectionClosed | Self::Io(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed when the caller issues a fresh call.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Connect { .. }
                | Self::ConnectionClosed
                | Self::PoolExhausted { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
