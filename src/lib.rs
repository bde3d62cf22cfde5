//! # ipcwire-client
//!
//! Async client for named IPC services that push notifications.
//!
//! A [`Client`] binds to one service by name, opens a connection through a
//! [`Transport`](transport::Transport), and routes every inbound
//! notification to the handler registered for its kind:
//!
//! - [`NotificationKind::Event`] carries a structured [`Value`]
//! - [`NotificationKind::Error`] carries an [`ErrorDescriptor`]
//!
//! Each kind is delivered in order by its own worker, so a slow handler never
//! stalls the connection. After [`Client::disconnect`] returns no handler
//! runs again.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use ipcwire_client::transport::SocketTransport;
//! use ipcwire_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("svc.example", SocketTransport::default())?;
//!
//!     client.on_event(|value| async move {
//!         println!("{}", value);
//!         Ok(())
//!     });
//!
//!     client.connect().await?;
//!     tokio::signal::ctrl_c().await?;
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod notification;
pub mod protocol;
pub mod service;
pub mod state;
pub mod transport;
pub mod value;

mod client;
mod writer;

pub use client::{
    Client, ClientBuilder, ClientConfig, ReusePolicy, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_DRAIN_TIMEOUT, DEFAULT_QUEUE_CAPACITY,
};
pub use error::{HandlerError, HandlerResult, IpcError, Result};
pub use notification::{ErrorDescriptor, Notification, NotificationKind};
pub use service::ServiceIdentifier;
pub use state::ConnectionState;
pub use value::Value;
