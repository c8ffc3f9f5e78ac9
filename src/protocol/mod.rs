//! Wire protocol and payload types.
//!
//! # Protocol Overview
//!
//! | Layer | Format |
//! |-------|--------|
//! | Frame | 4-byte big-endian length + payload bytes |
//! | Payload | Opaque bytes (JSON [`MessageDto`] in the demos) |
//!
//! The framing is not negotiated on the wire: both peers must agree on it
//! and on the maximum frame size out of band.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Length-prefixed frame encoder/decoder |
//! | `message` | Sample JSON message payload |

// ============================================================================
// Submodules
// ============================================================================

/// Length-prefixed frame codec.
pub mod codec;

/// Sample JSON message payload.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{DEFAULT_MAX_FRAME_SIZE, FrameCodec, LENGTH_PREFIX_LEN, encode_frame};
pub use message::MessageDto;
