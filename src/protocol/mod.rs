//! Protocol module - wire format and framing for socket connections.
//!
//! - 6-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{kind, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
