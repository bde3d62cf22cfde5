//! In-process loopback transport.
//!
//! [`MemoryTransport`] keeps a table of registered services. Each service is
//! driven from the other side through its [`ServiceEndpoint`]: push events
//! and errors, read what the client emitted, hang up, or make the service
//! unreachable. One live connection per service; a new open replaces the
//! previous link.
//!
//! # Example
//!
//! ```ignore
//! use ipcwire_client::transport::MemoryTransport;
//! use ipcwire_client::Client;
//!
//! let transport = MemoryTransport::new();
//! let endpoint = transport.register("svc.example");
//!
//! let client = Client::new("svc.example", transport)?;
//! client.connect().await?;
//!
//! endpoint.send_event("ping");
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::{Connection, Transport};
use crate::error::{IpcError, Result};
use crate::handler::BoxFuture;
use crate::notification::{ErrorDescriptor, Notification};
use crate::service::ServiceIdentifier;
use crate::value::Value;

/// Loopback transport backed by in-process channels.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    services: Arc<Mutex<HashMap<String, Arc<EndpointShared>>>>,
}

impl MemoryTransport {
    /// Create a transport with no registered services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, or return the endpoint of an existing one.
    pub fn register(&self, name: &str) -> ServiceEndpoint {
        let mut services = lock(&self.services);
        let shared = services
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(EndpointShared::new(name)))
            .clone();

        ServiceEndpoint { shared }
    }

    /// Remove a service. Later opens fail with `TransportUnavailable`;
    /// an existing link is hung up.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = lock(&self.services).remove(name);
        match removed {
            Some(shared) => {
                lock(&shared.state).link = None;
                true
            }
            None => false,
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<EndpointShared>> {
        lock(&self.services).get(name).cloned()
    }
}

impl Transport for MemoryTransport {
    fn open<'a>(
        &'a self,
        service: &'a ServiceIdentifier,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>>> {
        Box::pin(async move {
            let unavailable =
                || IpcError::TransportUnavailable(format!("no service listening as {}", service));

            let shared = self.lookup(service.as_str()).ok_or_else(unavailable)?;

            let delay = lock(&shared.state).open_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let link_id = shared.next_link.fetch_add(1, Ordering::Relaxed);
            {
                let mut state = lock(&shared.state);
                if !state.available {
                    return Err(unavailable());
                }
                state.link = Some(Link { id: link_id, tx });
            }
            shared.opens.fetch_add(1, Ordering::SeqCst);

            tracing::debug!(service = %service, link_id, "Memory link opened");

            let (closed, _) = watch::channel(false);
            let connection = MemoryConnection {
                shared,
                link_id,
                inbound: tokio::sync::Mutex::new(rx),
                closed,
            };
            Ok(Box::new(connection) as Box<dyn Connection>)
        })
    }
}

/// Service side of a [`MemoryTransport`] registration.
#[derive(Clone)]
pub struct ServiceEndpoint {
    shared: Arc<EndpointShared>,
}

impl ServiceEndpoint {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Deliver a notification to the connected client.
    ///
    /// Returns `false` if no client is connected.
    pub fn send(&self, notification: Notification) -> bool {
        let state = lock(&self.shared.state);
        match &state.link {
            Some(link) => link.tx.send(notification).is_ok(),
            None => false,
        }
    }

    pub fn send_event(&self, value: impl Into<Value>) -> bool {
        self.send(Notification::Event(value.into()))
    }

    pub fn send_error(&self, error: ErrorDescriptor) -> bool {
        self.send(Notification::Error(error))
    }

    /// End the current link from the service side.
    ///
    /// Notifications already sent are still delivered before the stream ends.
    pub fn hang_up(&self) -> bool {
        lock(&self.shared.state).link.take().is_some()
    }

    /// Make the service reachable or unreachable for future opens.
    pub fn set_available(&self, available: bool) {
        lock(&self.shared.state).available = available;
    }

    /// Delay every open by `delay`, to exercise the `Connecting` window.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        lock(&self.shared.state).open_delay = delay;
    }

    /// Whether a client link is currently established.
    pub fn is_connected(&self) -> bool {
        lock(&self.shared.state).link.is_some()
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Number of `close()` calls received from clients.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Next message emitted by a client, waiting if none is queued.
    pub async fn next_message(&self) -> Option<Value> {
        self.shared.messages_rx.lock().await.recv().await
    }

    /// Next message emitted by a client, if one is already queued.
    pub fn try_next_message(&self) -> Option<Value> {
        self.shared.messages_rx.try_lock().ok()?.try_recv().ok()
    }
}

struct Link {
    id: u64,
    tx: mpsc::UnboundedSender<Notification>,
}

struct EndpointState {
    available: bool,
    open_delay: Option<Duration>,
    link: Option<Link>,
}

struct EndpointShared {
    name: String,
    state: Mutex<EndpointState>,
    messages_tx: mpsc::UnboundedSender<Value>,
    messages_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    next_link: AtomicU64,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl EndpointShared {
    fn new(name: &str) -> Self {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        Self {
            name: name.to_string(),
            state: Mutex::new(EndpointState {
                available: true,
                open_delay: None,
                link: None,
            }),
            messages_tx,
            messages_rx: tokio::sync::Mutex::new(messages_rx),
            next_link: AtomicU64::new(1),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }
}

struct MemoryConnection {
    shared: Arc<EndpointShared>,
    link_id: u64,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Notification>>,
    closed: watch::Sender<bool>,
}

impl Connection for MemoryConnection {
    fn receive(&self) -> BoxFuture<'_, Option<Notification>> {
        Box::pin(async move {
            let mut closed = self.closed.subscribe();
            if *closed.borrow() {
                return None;
            }

            let mut inbound = self.inbound.lock().await;
            tokio::select! {
                biased;
                _ = closed.wait_for(|c| *c) => None,
                next = inbound.recv() => next,
            }
        })
    }

    fn send(&self, message: Value) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if *self.closed.borrow() {
                return Err(IpcError::ConnectionClosed);
            }
            self.shared
                .messages_tx
                .send(message)
                .map_err(|_| IpcError::ConnectionClosed)
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed.send_replace(true);

            {
                let mut state = lock(&self.shared.state);
                if state.link.as_ref().map(|l| l.id) == Some(self.link_id) {
                    state.link = None;
                }
            }
            self.shared.closes.fetch_add(1, Ordering::SeqCst);

            tracing::debug!(service = %self.shared.name, link_id = self.link_id, "Memory link closed");
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
