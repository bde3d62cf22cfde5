//! Transport module - the byte-moving collaborator behind a [`Client`](crate::Client).
//!
//! A [`Transport`] knows how to reach a named service and yields a
//! [`Connection`]; the connection produces classified notifications until it
//! is closed. Two implementations ship with the crate:
//!
//! - [`SocketTransport`] - Unix Domain Sockets (Linux/macOS), Named Pipes (Windows)
//! - [`MemoryTransport`] - in-process loopback, for tests and embedding

mod memory;
mod socket;

pub use memory::{MemoryTransport, ServiceEndpoint};
pub use socket::{SocketConfig, SocketTransport, MAX_SOCKET_PATH_LEN};

use crate::error::Result;
use crate::handler::BoxFuture;
use crate::notification::Notification;
use crate::service::ServiceIdentifier;
use crate::value::Value;

/// Opens connections to named services.
pub trait Transport: Send + Sync + 'static {
    /// Apply transport-specific naming rules on top of the generic ones.
    fn validate(&self, _service: &ServiceIdentifier) -> Result<()> {
        Ok(())
    }

    /// Open a connection to `service`.
    ///
    /// Fails with [`IpcError::TransportUnavailable`](crate::IpcError::TransportUnavailable)
    /// when the service cannot be reached.
    fn open<'a>(&'a self, service: &'a ServiceIdentifier)
        -> BoxFuture<'a, Result<Box<dyn Connection>>>;
}

/// A live connection handle.
///
/// The client calls [`close`](Connection::close) exactly once per opened
/// connection and may call it while a [`receive`](Connection::receive) is
/// pending on another task.
pub trait Connection: Send + Sync + 'static {
    /// Next inbound notification, or `None` once the stream has ended.
    fn receive(&self) -> BoxFuture<'_, Option<Notification>>;

    /// Send a message to the service.
    fn send(&self, message: Value) -> BoxFuture<'_, Result<()>>;

    /// Release the connection.
    fn close(&self) -> BoxFuture<'_, ()>;
}
