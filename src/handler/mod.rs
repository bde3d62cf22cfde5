//! Handler module - notification handlers and dispatch.
//!
//! Provides:
//! - [`Handler`] - trait object seam for notification callbacks
//! - [`CallbackRegistry`] - at most one handler per [`NotificationKind`](crate::NotificationKind)
//! - per-kind dispatch workers (crate-internal)
//!
//! # Example
//!
//! ```ignore
//! use ipcwire_client::handler::CallbackRegistry;
//! use ipcwire_client::{ErrorDescriptor, Value};
//!
//! let mut registry = CallbackRegistry::new();
//!
//! registry.register_event(|value: Value| async move {
//!     println!("event: {}", value);
//!     Ok(())
//! });
//!
//! registry.register_error(|error: ErrorDescriptor| async move {
//!     eprintln!("error: {}", error);
//!     Ok(())
//! });
//! ```

pub(crate) mod dispatch;
mod registry;

pub use registry::{BoxFuture, CallbackRegistry, Handler};
pub(crate) use registry::TypedHandler;
