//! JSON message payload exchanged by the sample client and server.
//!
//! The gateway itself only moves bytes; this type is the application-level
//! envelope the bundled demos put inside each frame.
//!
//! # Format
//!
//! ```json
//! {
//!   "message": "Hello this message from TCP server!",
//!   "sender": "tcp-server",
//!   "timestamp": "2026-10-17T09:30:00.123"
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Timestamp layout (ISO-8601 local date-time with fractional seconds).
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

// ============================================================================
// MessageDto
// ============================================================================

/// A text message with its sender and send time.
///
/// Unknown fields are ignored on deserialization; missing fields become
/// empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageDto {
    /// Message text.
    pub message: String,
    /// Name of the sending party.
    pub sender: String,
    /// Local time the message was created.
    pub timestamp: String,
}

impl MessageDto {
    /// Creates a message stamped with the current local time.
    #[must_use]
    pub fn new(message: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sender: sender.into(),
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Serializes the message into a frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_payload(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parses a message from a frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the payload is not a JSON object.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
