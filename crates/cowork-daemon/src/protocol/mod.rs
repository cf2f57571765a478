//! Wire protocol: framing and message types.
//!
//! The transport is a local stream socket carrying length-prefixed JSON in
//! both directions:
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | JSON payload     |
//! +----------------------------+------------------+
//! ```
//!
//! - Maximum frame size: 10 MiB
//! - Zero-length frames are illegal
//! - Requests: `{"method": ..., "params": ..., "id": ...}`
//! - Responses: `{"success": true, "result": ...}` or
//!   `{"success": false, "error": "..."}`
//! - Events: tagged objects pushed to subscribed connections
//!
//! Frame length is validated before any allocation, and each frame is
//! written as one contiguous buffer so concurrent writers on a connection
//! can never interleave header and payload.

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{MAX_FRAME_SIZE, ProtocolError, ProtocolResult};
pub use framing::FrameCodec;
pub use messages::{Request, Response};
