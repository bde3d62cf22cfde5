//! Frame struct with typed accessors.
//!
//! Uses `bytes::Bytes` so payloads can be handed to the decoder without
//! copying out of the read buffer.
//!
//! # Example
//!
//! ```
//! use ipcwire_client::protocol::{kind, Frame, Header};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Header::new(kind::EVENT, 5), Bytes::from_static(b"hello"));
//!
//! assert!(frame.is_event());
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{kind, Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn kind(&self) -> u8 {
        self.header.kind
    }

    #[inline]
    pub fn is_event(&self) -> bool {
        self.header.kind == kind::EVENT
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.header.kind == kind::ERROR
    }

    #[inline]
    pub fn is_message(&self) -> bool {
        self.header.kind == kind::MESSAGE
    }
}

/// Build a complete frame as a single byte vector.
///
/// The header's length field is taken from `payload`.
///
/// # Example
///
/// ```
/// use ipcwire_client::protocol::{build_frame, kind, HEADER_SIZE};
///
/// let bytes = build_frame(kind::MESSAGE, b"hello");
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(frame_kind: u8, payload: &[u8]) -> Vec<u8> {
    let header = Header::new(frame_kind, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
