//! Protocol error types.

/// Maximum frame size accepted in either direction (10 MiB).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Errors at the framing layer.
///
/// None of these can be answered on the wire; the connection is closed
/// instead.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The peer declared a zero-length frame.
    #[error("zero-length frame")]
    EmptyFrame,

    /// The peer declared a frame larger than the protocol allows.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared or attempted frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Underlying transport failure, including EOF mid-frame.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Construct a [`ProtocolError::FrameTooLarge`].
    #[must_use]
    pub const fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }
}

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
