//! Length-prefixed frame codec.
//!
//! Implements a [`tokio_util::codec`] compatible codec for the client's
//! length-prefixed framing. Each frame is a 4-byte big-endian length
//! followed by exactly that many payload bytes.
//!
//! The frame length is validated before allocation: oversized frames are
//! rejected with [`ProtocolError::FrameTooLarge`] and zero-length frames
//! with [`ProtocolError::EmptyFrame`]. The encoder builds header and
//! payload into a single contiguous buffer, so one `send` produces one
//! write; event pushes racing with reply writes additionally hold the
//! connection's write lock and can therefore never corrupt the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::{MAX_FRAME_SIZE, ProtocolError, ProtocolResult};

/// Length of the frame header (4 bytes for a u32 length prefix).
const HEADER_LEN: usize = 4;

/// Frame codec implementing length-prefixed framing.
///
/// Used with [`tokio_util::codec::Framed`] to provide frame-based I/O over
/// the Unix socket.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec with the protocol's maximum frame size.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom maximum frame size.
    ///
    /// # Panics
    ///
    /// Panics if `max_size` exceeds [`MAX_FRAME_SIZE`].
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        assert!(
            max_size <= MAX_FRAME_SIZE,
            "max_size {max_size} exceeds protocol limit {MAX_FRAME_SIZE}"
        );
        Self {
            max_frame_size: max_size,
        }
    }

    /// Returns the maximum frame size for this codec.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    /// Decode a frame from the input buffer.
    ///
    /// The declared length is validated against `max_frame_size` before any
    /// allocation occurs.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(frame))` if a complete frame was decoded
    /// - `Ok(None)` if more data is needed
    /// - `Err(_)` for zero-length or oversized frames
    fn decode(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<Bytes>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if length > self.max_frame_size {
            return Err(ProtocolError::frame_too_large(length, self.max_frame_size));
        }

        let total_len = HEADER_LEN + length;
        if src.len() < total_len {
            // Reserve capacity for the expected frame to reduce reallocations
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();

        Ok(Some(payload))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    /// Encode a frame into the output buffer as one contiguous
    /// header+payload region.
    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> ProtocolResult<()> {
        if item.len() > self.max_frame_size {
            return Err(ProtocolError::frame_too_large(
                item.len(),
                self.max_frame_size,
            ));
        }
        if item.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }

        dst.reserve(HEADER_LEN + item.len());

        #[allow(clippy::cast_possible_truncation)] // Validated above
        let length = item.len() as u32;
        dst.put_u32(length);
        dst.extend_from_slice(&item);

        Ok(())
    }
}
