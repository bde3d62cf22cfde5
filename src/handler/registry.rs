//! Callback registry keyed by notification kind.
//!
//! Each [`NotificationKind`] has zero or one handler. Registering again
//! replaces the previous handler; a kind with no handler drops its
//! notifications. Typed registration (`register_event`, `register_error`)
//! fixes the kind from the closure's argument type, so a handler can never
//! be installed on a kind it cannot accept.
//!
//! # Example
//!
//! ```ignore
//! use ipcwire_client::handler::CallbackRegistry;
//! use ipcwire_client::Value;
//!
//! let mut registry = CallbackRegistry::new();
//!
//! registry.register_event(|value: Value| async move {
//!     println!("{}", value);
//!     Ok(())
//! });
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{HandlerError, HandlerResult};
use crate::notification::{ErrorDescriptor, Notification, NotificationKind};
use crate::value::Value;

/// Boxed future used at trait-object seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for notification handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle one notification.
    fn call(&self, notification: Notification) -> BoxFuture<'static, HandlerResult>;
}

/// Conversion from a routed notification into a handler's argument type.
pub(crate) trait FromNotification: Sized + Send + 'static {
    fn from_notification(notification: Notification) -> Option<Self>;
}

impl FromNotification for Notification {
    fn from_notification(notification: Notification) -> Option<Self> {
        Some(notification)
    }
}

impl FromNotification for Value {
    fn from_notification(notification: Notification) -> Option<Self> {
        match notification {
            Notification::Event(value) => Some(value),
            Notification::Error(_) => None,
        }
    }
}

impl FromNotification for ErrorDescriptor {
    fn from_notification(notification: Notification) -> Option<Self> {
        match notification {
            Notification::Error(error) => Some(error),
            Notification::Event(_) => None,
        }
    }
}

/// Wrapper that converts the notification before calling a closure.
pub(crate) struct TypedHandler<F, T, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: FromNotification,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: FromNotification,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: FromNotification,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, notification: Notification) -> BoxFuture<'static, HandlerResult> {
        let kind = notification.kind();
        let arg = match T::from_notification(notification) {
            Some(arg) => arg,
            None => {
                return Box::pin(async move {
                    Err::<(), HandlerError>(
                        format!("handler cannot accept {} notifications", kind).into(),
                    )
                })
            }
        };

        Box::pin((self.handler)(arg))
    }
}

/// Registry mapping each notification kind to at most one handler.
#[derive(Default)]
pub struct CallbackRegistry {
    slots: [Option<Arc<dyn Handler>>; NotificationKind::COUNT],
}

impl CallbackRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler, replacing any previous one.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn set(&mut self, kind: NotificationKind, handler: Arc<dyn Handler>) -> bool {
        self.slots[kind.index()].replace(handler).is_some()
    }

    /// Register a closure that receives the whole [`Notification`].
    pub fn register<F, Fut>(&mut self, kind: NotificationKind, handler: F) -> bool
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.set(kind, Arc::new(TypedHandler::new(handler)))
    }

    /// Register the `Event` handler.
    pub fn register_event<F, Fut>(&mut self, handler: F) -> bool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.set(NotificationKind::Event, Arc::new(TypedHandler::new(handler)))
    }

    /// Register the `Error` handler.
    pub fn register_error<F, Fut>(&mut self, handler: F) -> bool
    where
        F: Fn(ErrorDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.set(NotificationKind::Error, Arc::new(TypedHandler::new(handler)))
    }

    /// Remove the handler for `kind`. Returns `true` if one was registered.
    pub fn remove(&mut self, kind: NotificationKind) -> bool {
        self.slots[kind.index()].take().is_some()
    }

    /// Current handler for `kind`.
    ///
    /// The returned `Arc` keeps the handler alive for one invocation even if
    /// it is replaced meanwhile.
    pub fn get(&self, kind: NotificationKind) -> Option<Arc<dyn Handler>> {
        self.slots[kind.index()].clone()
    }

    pub fn is_registered(&self, kind: NotificationKind) -> bool {
        self.slots[kind.index()].is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>) -> impl Fn(Notification) -> BoxFuture<'static, HandlerResult> {
        move |_n| {
            counter.fetch_add(1, Ordering::SeqCst);
            let fut: BoxFuture<'static, HandlerResult> = Box::pin(async { Ok(()) });
            fut
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = CallbackRegistry::new();
        for kind in NotificationKind::ALL {
            assert!(registry.get(kind).is_none());
            assert!(!registry.is_registered(kind));
        }
    }

    #[test]
    fn test_register_reports_replacement() {
        let mut registry = CallbackRegistry::new();

        let replaced = registry.register_event(|_| async { Ok(()) });
        assert!(!replaced);

        let replaced = registry.register(NotificationKind::Event, |_| async { Ok(()) });
        assert!(replaced);

        assert!(registry.is_registered(NotificationKind::Event));
        assert!(!registry.is_registered(NotificationKind::Error));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut registry = CallbackRegistry::new();
        registry.register(NotificationKind::Event, counting(first.clone()));
        registry.register(NotificationKind::Event, counting(second.clone()));

        let handler = registry.get(NotificationKind::Event).unwrap();
        handler
            .call(Notification::Event(Value::from("ping")))
            .await
            .unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_old_handler_survives_replacement_while_held() {
        let old = Arc::new(AtomicUsize::new(0));

        let mut registry = CallbackRegistry::new();
        registry.register(NotificationKind::Event, counting(old.clone()));
        let in_flight = registry.get(NotificationKind::Event).unwrap();

        registry.register_event(|_| async { Ok(()) });

        in_flight
            .call(Notification::Event(Value::from(1)))
            .await
            .unwrap();
        assert_eq!(old.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove() {
        let mut registry = CallbackRegistry::new();
        registry.register_error(|_| async { Ok(()) });

        assert!(registry.remove(NotificationKind::Error));
        assert!(!registry.remove(NotificationKind::Error));
        assert!(registry.get(NotificationKind::Error).is_none());
    }

    #[tokio::test]
    async fn test_typed_handler_rejects_wrong_kind() {
        let handler = TypedHandler::new(|_: Value| async { Ok(()) });
        let result = handler
            .call(Notification::Error(ErrorDescriptor::ConnectionInvalid))
            .await;
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot accept error notifications"));
    }

    #[tokio::test]
    async fn test_typed_error_handler_receives_descriptor() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handler = TypedHandler::new(move |e: ErrorDescriptor| {
            let tx = tx.clone();
            async move {
                tx.send(e).ok();
                Ok(())
            }
        });

        handler
            .call(Notification::Error(ErrorDescriptor::ConnectionInterrupted))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(ErrorDescriptor::ConnectionInterrupted));
    }

    #[tokio::test]
    async fn test_typed_registration_targets_matching_kind() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut registry = CallbackRegistry::new();
        registry.register_error(move |e| {
            let tx = tx.clone();
            async move {
                tx.send(e).ok();
                Ok(())
            }
        });

        assert!(!registry.is_registered(NotificationKind::Event));
        let handler = registry.get(NotificationKind::Error).unwrap();
        handler
            .call(Notification::Error(ErrorDescriptor::ConnectionInvalid))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(ErrorDescriptor::ConnectionInvalid));
    }
}
