//! Error types for ipcwire-client.

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Service identifier is empty or violates the naming rules.
    #[error("Invalid service identifier: {0}")]
    InvalidIdentifier(String),

    /// The service could not be reached. The caller may retry `connect()`.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// `connect()` was called while another attempt is in flight.
    #[error("Connection attempt already in progress")]
    AlreadyConnecting,

    /// The client was configured for single use and has already been disconnected.
    #[error("Client closed")]
    ClientClosed,

    /// The connection attempt was cancelled by a concurrent `disconnect()`.
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// Operation requires a live connection.
    #[error("Not connected")]
    NotConnected,

    /// I/O error during socket/pipe operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid frame, unknown kind, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection closed underneath an outbound write.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using IpcError.
pub type Result<T> = std::result::Result<T, IpcError>;

/// Error returned by notification handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<(), HandlerError>;
