//! Length-prefixed frame codec.
//!
//! Every message on the wire is a 4-byte big-endian unsigned length `N`
//! followed by exactly `N` payload bytes:
//!
//! ```text
//! ┌──────────────────┬─────────────────────────────┐
//! │ length (u32, BE) │ payload (length bytes)      │
//! └──────────────────┴─────────────────────────────┘
//! ```
//!
//! The codec plugs into `tokio_util::codec::Framed`, which owns the read
//! buffer and hands partial socket reads back to [`FrameCodec::decode`]
//! until a whole frame is present.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default maximum payload size (4 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

// ============================================================================
// FrameCodec
// ============================================================================

/// Encoder/decoder for length-prefixed frames.
///
/// Frames announcing a payload larger than `max_frame_size` are rejected
/// with [`Error::FrameTooLarge`] before any of their payload is buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Creates a codec enforcing the given maximum payload size.
    #[inline]
    #[must_use]
    pub const fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Returns the configured maximum payload size.
    #[inline]
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_frame_size || len > u32::MAX as usize {
            return Err(Error::frame_too_large(len, self.max_frame_size));
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < LENGTH_PREFIX_LEN {
            src.reserve(LENGTH_PREFIX_LEN - src.len());
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_LEN]);
        let len = u32::from_be_bytes(prefix) as usize;
        self.check_len(len)?;

        let total = LENGTH_PREFIX_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        let payload = src.split_to(len).freeze();
        trace!(size = len, "Frame decoded");
        Ok(Some(payload))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // Peer hung up in the middle of a frame
            None => Err(Error::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        self.encode(&payload[..], dst)
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        self.check_len(payload.len())?;

        dst.reserve(LENGTH_PREFIX_LEN + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(payload);
        trace!(size = payload.len(), "Frame encoded");
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Encodes a single payload into a standalone frame.
///
/// # Errors
///
/// Returns [`Error::FrameTooLarge`] if `payload` exceeds `max_frame_size`.
pub fn encode_frame(payload: &[u8], max_frame_size: usize) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    FrameCodec::new(max_frame_size).encode(payload, &mut buf)?;
    Ok(buf.freeze())
}

// ============================================================================
// Tests
// ============================================================================
