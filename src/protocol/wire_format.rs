//! Wire format encoding and decoding.
//!
//! Every frame on a socket connection starts with a 6-byte header:
//! ```text
//! ┌───────┬───────┬──────────┐
//! │ Kind  │ Flags │ Length   │
//! │ 1 byte│ 1 byte│ 4 bytes  │
//! │       │       │ uint32 BE│
//! └───────┴───────┴──────────┘
//! ```
//!
//! The payload that follows is a MessagePack-encoded value (events and
//! messages) or error descriptor (errors).

use crate::error::{IpcError, Result};

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Frame kind constants.
pub mod kind {
    /// Service -> client event carrying a value.
    pub const EVENT: u8 = 0x01;
    /// Service -> client error descriptor.
    pub const ERROR: u8 = 0x02;
    /// Client -> service message carrying a value.
    pub const MESSAGE: u8 = 0x03;

    /// Whether `kind` is one of the defined frame kinds.
    #[inline]
    pub fn is_known(kind: u8) -> bool {
        matches!(kind, EVENT | ERROR | MESSAGE)
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame kind (see `kind` module).
    pub kind: u8,
    /// Reserved, must be 0.
    pub flags: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    pub fn new(kind: u8, payload_length: u32) -> Self {
        Self {
            kind,
            flags: 0,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use ipcwire_client::protocol::{kind, Header};
    ///
    /// let bytes = Header::new(kind::EVENT, 100).encode();
    /// assert_eq!(bytes, [0x01, 0x00, 0, 0, 0, 100]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.kind;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            kind: buf[0],
            flags: buf[1],
            payload_length: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Kind is a defined frame kind
    /// - Flags byte is 0
    /// - Payload length doesn't exceed max
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if !kind::is_known(self.kind) {
            return Err(IpcError::Protocol(format!(
                "Unknown frame kind 0x{:02x}",
                self.kind
            )));
        }

        if self.flags != 0 {
            return Err(IpcError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        if self.payload_length > max_payload_size {
            return Err(IpcError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header::new(kind::ERROR, 0x0102_0304);
        let bytes = header.encode();

        assert_eq!(bytes, [0x02, 0x00, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(Header::decode(&bytes), Some(header));
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; HEADER_SIZE - 1];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_unknown_kind_rejected() {
        let header = Header::new(0x7f, 0);
        let err = header.validate(DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(err.to_string().contains("Unknown frame kind 0x7f"));
    }

    #[test]
    fn test_validate_flags_must_be_zero() {
        let header = Header {
            kind: kind::EVENT,
            flags: 0b1000_0000,
            payload_length: 0,
        };
        let err = header.validate(DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(err.to_string().contains("Reserved flag bits"));
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = Header::new(kind::EVENT, 1_000);
        let err = header.validate(100).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));

        assert!(Header::new(kind::EVENT, 100).validate(100).is_ok());
    }

    #[test]
    fn test_known_kinds() {
        assert!(kind::is_known(kind::EVENT));
        assert!(kind::is_known(kind::ERROR));
        assert!(kind::is_known(kind::MESSAGE));
        assert!(!kind::is_known(0));
    }
}
