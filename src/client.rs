//! Client builder and connection lifecycle.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring handlers and
//! settings. The [`Client`] drives the lifecycle:
//! 1. Open a connection through the [`Transport`]
//! 2. Route inbound notifications to per-kind dispatch workers
//! 3. On `disconnect()` (or service hang-up), drain or discard queued
//!    notifications and release the connection
//!
//! # Example
//!
//! ```ignore
//! use ipcwire_client::transport::SocketTransport;
//! use ipcwire_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder("svc.example", SocketTransport::default())
//!         .on_event(|value| async move {
//!             println!("event: {}", value);
//!             Ok(())
//!         })
//!         .on_error(|error| async move {
//!             eprintln!("error: {}", error);
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     client.connect().await?;
//!     tokio::signal::ctrl_c().await?;
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{HandlerResult, IpcError, Result};
use crate::handler::dispatch::{self, HandlerLookup, LoopExit};
use crate::handler::{CallbackRegistry, Handler, TypedHandler};
use crate::notification::{ErrorDescriptor, Notification, NotificationKind};
use crate::service::ServiceIdentifier;
use crate::state::ConnectionState;
use crate::transport::{Connection, Transport};
use crate::value::Value;

/// Default capacity of each per-kind dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default limit on how long opening a connection may take.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time teardown waits for in-flight handlers before aborting them.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Whether a client may connect again after a completed lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReusePolicy {
    /// `connect()` after `disconnect()` starts a fresh lifecycle.
    #[default]
    Reconnect,
    /// `connect()` after a completed lifecycle fails with `ClientClosed`.
    SingleUse,
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Capacity of each per-kind dispatch queue. When a queue is full the
    /// transport is not read until the handler catches up.
    pub queue_capacity: usize,
    /// Limit on opening a connection. Expiry fails `connect()` with
    /// `TransportUnavailable`. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// How long teardown waits for in-flight handlers before aborting them.
    pub drain_timeout: Duration,
    /// Whether `connect()` may start a new lifecycle after `disconnect()`.
    pub reuse: ReusePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            reuse: ReusePolicy::default(),
        }
    }
}

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    service: String,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    registry: CallbackRegistry,
}

impl ClientBuilder {
    pub fn new(service: &str, transport: impl Transport) -> Self {
        Self {
            service: service.to_string(),
            transport: Arc::new(transport),
            config: ClientConfig::default(),
            registry: CallbackRegistry::new(),
        }
    }

    /// Register a handler that receives whole notifications of `kind`,
    /// replacing any earlier one.
    pub fn on<F, Fut>(mut self, kind: NotificationKind, handler: F) -> Self
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(kind, handler);
        self
    }

    /// Register the `Event` handler.
    pub fn on_event<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_event(handler);
        self
    }

    /// Register the `Error` handler.
    pub fn on_error<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ErrorDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_error(handler);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the per-kind dispatch queue capacity.
    ///
    /// Default: 1024
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the connect timeout (`None` disables it).
    ///
    /// Default: 10 seconds
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set how long teardown waits for in-flight handlers.
    ///
    /// Default: 5 seconds
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Set whether the client may connect again after `disconnect()`.
    ///
    /// Default: [`ReusePolicy::Reconnect`]
    pub fn reuse(mut self, policy: ReusePolicy) -> Self {
        self.config.reuse = policy;
        self
    }

    /// Validate the service identifier and build the client.
    ///
    /// Fails with `InvalidIdentifier` if the name breaks the generic naming
    /// rules or the transport's own rules. No connection is attempted.
    pub fn build(self) -> Result<Client> {
        let service = ServiceIdentifier::parse(&self.service)?;
        self.transport.validate(&service)?;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            service,
            transport: self.transport,
            config: self.config,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                registry: self.registry,
                session: None,
                attempt: None,
                draining: None,
                completed_lifecycles: 0,
                next_session_id: 1,
            }),
            state_tx,
        });

        Ok(Client { shared })
    }
}

/// A client bound to one named service.
///
/// Cloning is cheap and yields another handle to the same client, so a
/// signal task can call [`disconnect`](Client::disconnect) while another
/// task owns the connect path.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Create a client with default settings and no handlers.
    pub fn new(service: &str, transport: impl Transport) -> Result<Self> {
        ClientBuilder::new(service, transport).build()
    }

    /// Start configuring a client for `service`.
    pub fn builder(service: &str, transport: impl Transport) -> ClientBuilder {
        ClientBuilder::new(service, transport)
    }

    /// The service this client is bound to.
    pub fn service(&self) -> &ServiceIdentifier {
        &self.shared.service
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Whether the state is `Connected`.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch channel that receives every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Register a handler that receives whole notifications of `kind`,
    /// replacing any earlier one.
    ///
    /// A notification already handed to the old handler finishes there;
    /// later ones go to the new handler. Returns `true` if a handler was
    /// replaced.
    pub fn on<F, Fut>(&self, kind: NotificationKind, handler: F) -> bool
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.set_handler(kind, Arc::new(TypedHandler::new(handler)))
    }

    /// Register the `Event` handler. Same replace semantics as [`on`](Client::on).
    pub fn on_event<F, Fut>(&self, handler: F) -> bool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.set_handler(NotificationKind::Event, Arc::new(TypedHandler::new(handler)))
    }

    pub fn on_error<F, Fut>(&self, handler: F) -> bool
    where
        F: Fn(ErrorDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.set_handler(NotificationKind::Error, Arc::new(TypedHandler::new(handler)))
    }

    /// Install an already-built handler for `kind`.
    pub fn set_handler(&self, kind: NotificationKind, handler: Arc<dyn Handler>) -> bool {
        self.shared.lock().registry.set(kind, handler)
    }

    /// Remove the handler for `kind`; its notifications are dropped from now on.
    pub fn off(&self, kind: NotificationKind) -> bool {
        self.shared.lock().registry.remove(kind)
    }

    /// Connect to the service and start delivering notifications.
    ///
    /// - `Connected`: returns `Ok(())` immediately.
    /// - `Connecting`: fails with `AlreadyConnecting`.
    /// - `Disconnecting`: waits for teardown to finish, then connects.
    ///
    /// Fails with `TransportUnavailable` if the service cannot be reached
    /// (state returns to `Disconnected`), and with `Cancelled` if a
    /// concurrent `disconnect()` cancelled the attempt.
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;

        loop {
            let next = {
                let mut inner = shared.lock();
                match inner.state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Connecting => return Err(IpcError::AlreadyConnecting),
                    ConnectionState::Disconnecting => ConnectStep::Wait(shared.state_tx.subscribe()),
                    ConnectionState::Disconnected => {
                        if shared.config.reuse == ReusePolicy::SingleUse
                            && inner.completed_lifecycles > 0
                        {
                            return Err(IpcError::ClientClosed);
                        }

                        let (attempt_tx, attempt_rx) = watch::channel(false);
                        inner.attempt = Some(attempt_tx);
                        shared.transition(&mut inner, ConnectionState::Connecting);
                        ConnectStep::Attempt(attempt_rx)
                    }
                }
            };

            match next {
                ConnectStep::Attempt(cancel) => return run_attempt(shared, cancel).await,
                ConnectStep::Wait(mut state_rx) => {
                    tracing::debug!(service = %shared.service, "Waiting for teardown before connecting");
                    let _ = state_rx
                        .wait_for(|s| *s != ConnectionState::Disconnecting)
                        .await;
                }
            }
        }
    }

    /// Disconnect and release the connection. Never fails.
    ///
    /// When this returns, no handler of this client will be invoked again;
    /// notifications still queued are discarded. A handler that is already
    /// running finishes first (up to the drain timeout). Called while
    /// `Connecting`, it cancels the attempt and waits until the client is
    /// `Disconnected`.
    ///
    /// Teardown runs on its own task, so dropping this future early does not
    /// leave the client stuck in `Disconnecting`. Called from inside one of
    /// this client's handlers, it cancels delivery and returns without
    /// waiting; teardown completes in the background and can be observed
    /// through [`state_changes`](Client::state_changes).
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        let in_handler = dispatch::in_handler_of(shared.id);

        let (session, mut state_rx) = {
            let mut inner = shared.lock();
            let state_rx = shared.state_tx.subscribe();
            match inner.state {
                ConnectionState::Disconnected => return,
                ConnectionState::Disconnecting => {
                    if let Some(draining) = &inner.draining {
                        draining.send_replace(true);
                    }
                    (None, state_rx)
                }
                ConnectionState::Connecting => {
                    shared.transition(&mut inner, ConnectionState::Disconnecting);
                    if let Some(attempt) = &inner.attempt {
                        attempt.send_replace(true);
                    }
                    (None, state_rx)
                }
                ConnectionState::Connected => {
                    let session = inner.session.take();
                    shared.transition(&mut inner, ConnectionState::Disconnecting);
                    match &session {
                        Some(session) => {
                            session.cancel.send_replace(true);
                        }
                        None => shared.transition(&mut inner, ConnectionState::Disconnected),
                    }
                    (session, state_rx)
                }
            }
        };

        if let Some(session) = session {
            let shared = Arc::clone(shared);
            tokio::spawn(async move { teardown(&shared, session).await });
        }

        if in_handler {
            return;
        }

        let _ = state_rx
            .wait_for(|s| *s != ConnectionState::Disconnecting)
            .await;
    }

    /// Send a message to the service over the live connection.
    ///
    /// Fails with `NotConnected` unless the client is `Connected`.
    pub async fn emit(&self, message: impl Into<Value>) -> Result<()> {
        let connection = {
            let inner = self.shared.lock();
            match (&inner.state, &inner.session) {
                (ConnectionState::Connected, Some(session)) => Arc::clone(&session.connection),
                _ => return Err(IpcError::NotConnected),
            }
        };

        connection.send(message.into()).await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("service", &self.shared.service)
            .field("state", &self.state())
            .finish()
    }
}

enum ConnectStep {
    Attempt(watch::Receiver<bool>),
    Wait(watch::Receiver<ConnectionState>),
}

struct Shared {
    id: u64,
    service: ServiceIdentifier,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

struct Inner {
    state: ConnectionState,
    registry: CallbackRegistry,
    session: Option<Session>,
    /// Cancels the in-flight `connect()` attempt.
    attempt: Option<watch::Sender<bool>>,
    /// Cancel signal of a session draining after service hang-up.
    draining: Option<Arc<watch::Sender<bool>>>,
    /// Lifecycles that reached `Connected` and were torn down.
    completed_lifecycles: u64,
    next_session_id: u64,
}

struct Session {
    id: u64,
    connection: Arc<dyn Connection>,
    cancel: Arc<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut Inner, next: ConnectionState) {
        debug_assert!(
            inner.state.can_transition_to(next),
            "invalid transition {} -> {}",
            inner.state,
            next
        );
        tracing::debug!(service = %self.service, from = %inner.state, to = %next, "State transition");
        inner.state = next;
        self.state_tx.send_replace(next);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);

        if let Some(attempt) = inner.attempt.take() {
            attempt.send_replace(true);
        }

        if let Some(session) = inner.session.take() {
            session.cancel.send_replace(true);
            let connection = session.connection;
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { connection.close().await });
                }
                Err(_) => {
                    tracing::warn!(service = %self.service, "Client dropped outside a runtime, connection not closed");
                }
            }
        }
    }
}

/// Reads the live registry so re-registration applies to the next dispatch.
struct RegistryLookup(Weak<Shared>);

impl HandlerLookup for RegistryLookup {
    fn handler(&self, kind: NotificationKind) -> Option<Arc<dyn Handler>> {
        let shared = self.0.upgrade()?;
        let handler = shared.lock().registry.get(kind);
        handler
    }
}

/// Resets an abandoned attempt if the `connect()` future is dropped.
struct AttemptGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.shared.lock();
        inner.attempt = None;
        if matches!(
            inner.state,
            ConnectionState::Connecting | ConnectionState::Disconnecting
        ) {
            self.shared
                .transition(&mut inner, ConnectionState::Disconnected);
        }
    }
}

async fn run_attempt(shared: &Arc<Shared>, mut cancel: watch::Receiver<bool>) -> Result<()> {
    let mut guard = AttemptGuard {
        shared: &**shared,
        armed: true,
    };

    let open = async {
        let opening = shared.transport.open(&shared.service);
        match shared.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, opening)
                .await
                .unwrap_or_else(|_| {
                    Err(IpcError::TransportUnavailable(format!(
                        "timed out after {:?} connecting to {}",
                        limit, shared.service
                    )))
                }),
            None => opening.await,
        }
    };

    let opened = tokio::select! {
        biased;
        _ = dispatch::cancelled(&mut cancel) => None,
        result = open => Some(result),
    };

    let leftover = {
        let mut inner = shared.lock();
        inner.attempt = None;
        let cancelled = inner.state == ConnectionState::Disconnecting;

        match opened {
            Some(Ok(connection)) if !cancelled => {
                start_session(shared, &mut inner, connection);
                shared.transition(&mut inner, ConnectionState::Connected);
                guard.armed = false;
                tracing::debug!(service = %shared.service, "Connected");
                return Ok(());
            }
            Some(Err(e)) if !cancelled => {
                shared.transition(&mut inner, ConnectionState::Disconnected);
                guard.armed = false;
                let e = match e {
                    e @ IpcError::TransportUnavailable(_) => e,
                    other => IpcError::TransportUnavailable(other.to_string()),
                };
                tracing::debug!(service = %shared.service, error = %e, "Connect failed");
                return Err(e);
            }
            Some(Ok(connection)) => Some(connection),
            _ => None,
        }
    };

    if let Some(connection) = leftover {
        connection.close().await;
    }

    {
        let mut inner = shared.lock();
        if matches!(
            inner.state,
            ConnectionState::Connecting | ConnectionState::Disconnecting
        ) {
            shared.transition(&mut inner, ConnectionState::Disconnected);
        }
    }
    guard.armed = false;

    tracing::debug!(service = %shared.service, "Connect cancelled");
    Err(IpcError::Cancelled)
}

/// Spawn workers and the routing task for a freshly opened connection.
fn start_session(shared: &Arc<Shared>, inner: &mut Inner, connection: Box<dyn Connection>) {
    let connection: Arc<dyn Connection> = Arc::from(connection);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let lookup = Arc::new(RegistryLookup(Arc::downgrade(shared)));

    let (queues, mut tasks) =
        dispatch::spawn_workers(shared.id, shared.config.queue_capacity, &cancel_rx, lookup);

    let session_id = inner.next_session_id;
    inner.next_session_id += 1;

    let weak = Arc::downgrade(shared);
    let reader = Arc::clone(&connection);
    tasks.push(tokio::spawn(async move {
        let exit = dispatch::run_dispatch_loop(reader, queues, cancel_rx).await;
        if exit == LoopExit::StreamEnded {
            if let Some(shared) = weak.upgrade() {
                tokio::spawn(async move { finish_peer_closed(&shared, session_id).await });
            }
        }
    }));

    inner.session = Some(Session {
        id: session_id,
        connection,
        cancel: Arc::new(cancel_tx),
        tasks,
    });
}

/// The service ended the stream: let queued notifications drain, then
/// release the connection without waiting for `disconnect()`.
async fn finish_peer_closed(shared: &Shared, session_id: u64) {
    let session = {
        let mut inner = shared.lock();
        let current = inner.session.as_ref().map(|s| s.id);
        if inner.state != ConnectionState::Connected || current != Some(session_id) {
            return;
        }
        let Some(session) = inner.session.take() else {
            return;
        };
        inner.draining = Some(Arc::clone(&session.cancel));
        shared.transition(&mut inner, ConnectionState::Disconnecting);
        session
    };

    tracing::debug!(service = %shared.service, "Service hung up");
    teardown(shared, session).await;
}

/// Join the session's tasks, close the connection once and finish the lifecycle.
async fn teardown(shared: &Shared, session: Session) {
    let Session {
        connection, tasks, ..
    } = session;

    let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
    let drain = async move {
        for task in tasks {
            let _ = task.await;
        }
    };

    if tokio::time::timeout(shared.config.drain_timeout, drain)
        .await
        .is_err()
    {
        tracing::warn!(
            service = %shared.service,
            timeout = ?shared.config.drain_timeout,
            "Handlers still running at drain timeout, aborting"
        );
        for abort in aborts {
            abort.abort();
        }
    }

    connection.close().await;

    let mut inner = shared.lock();
    inner.draining = None;
    inner.completed_lifecycles += 1;
    shared.transition(&mut inner, ConnectionState::Disconnected);
    tracing::debug!(service = %shared.service, "Disconnected");
}
