//! Per-kind dispatch workers and the inbound routing loop.
//!
//! ```text
//!                         ┌─► event queue ─► event worker ─► handler task
//! Connection::receive() ──┤
//!                         └─► error queue ─► error worker ─► handler task
//! ```
//!
//! The routing loop only classifies and enqueues, so a slow handler never
//! stops the transport from being read. Each worker drains its queue in FIFO
//! order and runs one handler invocation at a time, which keeps per-kind
//! ordering. Events and errors are not ordered relative to each other.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};

use super::Handler;
use crate::notification::{ErrorDescriptor, Notification, NotificationKind};
use crate::transport::Connection;

tokio::task_local! {
    /// Id of the client whose handler is running on the current task.
    static ACTIVE_CLIENT: u64;
}

/// Whether the current task is running a handler for `client_id`.
pub(crate) fn in_handler_of(client_id: u64) -> bool {
    ACTIVE_CLIENT
        .try_with(|id| *id == client_id)
        .unwrap_or(false)
}

/// Resolve when `cancel` becomes `true` or its sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|c| *c).await;
}

/// Source of the handler currently registered for a kind.
pub(crate) trait HandlerLookup: Send + Sync + 'static {
    fn handler(&self, kind: NotificationKind) -> Option<Arc<dyn Handler>>;
}

/// Sending side of the per-kind queues.
pub(crate) struct DispatchQueues {
    senders: [mpsc::Sender<Notification>; NotificationKind::COUNT],
}

impl DispatchQueues {
    fn sender(&self, kind: NotificationKind) -> &mpsc::Sender<Notification> {
        &self.senders[kind.index()]
    }
}

/// Why the routing loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// The session was cancelled by `disconnect()`.
    Cancelled,
    /// The transport stream ended on its own.
    StreamEnded,
}

/// Spawn one worker per kind and return the queues feeding them.
pub(crate) fn spawn_workers(
    client_id: u64,
    capacity: usize,
    cancel: &watch::Receiver<bool>,
    lookup: Arc<dyn HandlerLookup>,
) -> (DispatchQueues, Vec<JoinHandle<()>>) {
    let capacity = capacity.max(1);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let (error_tx, error_rx) = mpsc::channel(capacity);

    let event_worker = KindWorker {
        kind: NotificationKind::Event,
        client_id,
        rx: event_rx,
        cancel: cancel.clone(),
        lookup: lookup.clone(),
        failures: Some(error_tx.clone()),
    };
    let error_worker = KindWorker {
        kind: NotificationKind::Error,
        client_id,
        rx: error_rx,
        cancel: cancel.clone(),
        lookup,
        failures: None,
    };

    let tasks = vec![
        tokio::spawn(event_worker.run()),
        tokio::spawn(error_worker.run()),
    ];

    (
        DispatchQueues {
            senders: [event_tx, error_tx],
        },
        tasks,
    )
}

/// Read the connection and route each notification to its kind's queue.
///
/// On end of stream a `ConnectionInvalid` error is queued before returning,
/// so the error handler learns that the service went away.
pub(crate) async fn run_dispatch_loop(
    connection: Arc<dyn Connection>,
    queues: DispatchQueues,
    mut cancel: watch::Receiver<bool>,
) -> LoopExit {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return LoopExit::Cancelled,
            next = connection.receive() => next,
        };

        let (notification, exit) = match next {
            Some(notification) => (notification, None),
            None => (
                Notification::Error(ErrorDescriptor::ConnectionInvalid),
                Some(LoopExit::StreamEnded),
            ),
        };

        let kind = notification.kind();
        let sent = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return LoopExit::Cancelled,
            sent = queues.sender(kind).send(notification) => sent,
        };

        if sent.is_err() {
            tracing::warn!(kind = %kind, "Dispatch queue closed, stopping");
            return LoopExit::Cancelled;
        }

        if let Some(exit) = exit {
            tracing::debug!("Transport stream ended");
            return exit;
        }
    }
}

/// Aborts the handler task if the worker is dropped mid-invocation.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drains one kind's queue, invoking the registered handler sequentially.
struct KindWorker {
    kind: NotificationKind,
    client_id: u64,
    rx: mpsc::Receiver<Notification>,
    cancel: watch::Receiver<bool>,
    lookup: Arc<dyn HandlerLookup>,
    /// Where handler failures are reported (the error queue, for events).
    failures: Option<mpsc::Sender<Notification>>,
}

impl KindWorker {
    async fn run(mut self) {
        loop {
            let notification = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => break,
                next = self.rx.recv() => match next {
                    Some(n) => n,
                    None => break,
                },
            };

            if *self.cancel.borrow() {
                break;
            }

            self.invoke(notification).await;
        }

        if *self.cancel.borrow() {
            let mut discarded = 0usize;
            while self.rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                tracing::debug!(
                    kind = %self.kind,
                    discarded,
                    "Discarded queued notifications after disconnect"
                );
            }
        }
    }

    async fn invoke(&mut self, notification: Notification) {
        let Some(handler) = self.lookup.handler(self.kind) else {
            tracing::trace!(kind = %self.kind, "No handler registered, dropping notification");
            return;
        };

        // Own task per invocation: a panic surfaces as a JoinError here.
        let task = tokio::spawn(
            ACTIVE_CLIENT.scope(self.client_id, async move { handler.call(notification).await }),
        );
        let _guard = AbortOnDrop(task.abort_handle());

        let failure = match task.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) if e.is_panic() => format!("handler panicked: {}", panic_message(e)),
            Err(_) => return,
        };

        self.report_failure(failure).await;
    }

    /// Queue a `HandlerFailed` report on the error channel, waiting for room.
    ///
    /// Gives up only when the session is cancelled, since nothing is
    /// delivered after that anyway.
    async fn report_failure(&mut self, message: String) {
        tracing::error!(kind = %self.kind, error = %message, "Notification handler failed");

        let Some(failures) = &self.failures else {
            return;
        };

        let report = Notification::Error(ErrorDescriptor::HandlerFailed {
            kind: self.kind,
            message,
        });
        let sent = tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => return,
            sent = failures.send(report) => sent,
        };
        if sent.is_err() {
            tracing::warn!(kind = %self.kind, "Error channel closed, handler failure not delivered");
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerResult;
    use crate::handler::{BoxFuture, CallbackRegistry};
    use crate::value::Value;
    use std::sync::Mutex;
    use std::time::Duration;

    struct TestLookup(Mutex<CallbackRegistry>);

    impl HandlerLookup for TestLookup {
        fn handler(&self, kind: NotificationKind) -> Option<Arc<dyn Handler>> {
            self.0.lock().unwrap().get(kind)
        }
    }

    fn recorder(
        tx: mpsc::UnboundedSender<Notification>,
    ) -> impl Fn(Notification) -> BoxFuture<'static, HandlerResult> {
        move |n| {
            let tx = tx.clone();
            let fut: BoxFuture<'static, HandlerResult> = Box::pin(async move {
                tx.send(n).ok();
                Ok(())
            });
            fut
        }
    }

    #[tokio::test]
    async fn test_worker_preserves_order() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let mut registry = CallbackRegistry::new();
        registry.register(NotificationKind::Event, recorder(seen_tx));
        let lookup = Arc::new(TestLookup(Mutex::new(registry)));

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (queues, _tasks) = spawn_workers(1, 16, &cancel_rx, lookup);

        for i in 1..=5 {
            queues
                .sender(NotificationKind::Event)
                .send(Notification::Event(Value::from(i)))
                .await
                .unwrap();
        }

        for i in 1..=5 {
            let n = seen_rx.recv().await.unwrap();
            assert_eq!(n, Notification::Event(Value::from(i)));
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_is_reported_on_error_channel() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let mut registry = CallbackRegistry::new();
        registry.register_event(|v| async move {
            if v == Value::from("boom") {
                panic!("boom");
            }
            Ok(())
        });
        registry.register(NotificationKind::Error, recorder(seen_tx));
        let lookup = Arc::new(TestLookup(Mutex::new(registry)));

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (queues, _tasks) = spawn_workers(1, 16, &cancel_rx, lookup);

        queues
            .sender(NotificationKind::Event)
            .send(Notification::Event(Value::from("boom")))
            .await
            .unwrap();

        let reported = seen_rx.recv().await.unwrap();
        match reported {
            Notification::Error(ErrorDescriptor::HandlerFailed { kind, message }) => {
                assert_eq!(kind, NotificationKind::Event);
                assert!(message.contains("boom"), "{message}");
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_worker_discards_queue() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let mut registry = CallbackRegistry::new();
        registry.register(NotificationKind::Event, recorder(seen_tx));
        let lookup = Arc::new(TestLookup(Mutex::new(registry)));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send_replace(true);
        let (queues, tasks) = spawn_workers(1, 16, &cancel_rx, lookup);

        // Workers may already be gone; a failed send is fine here.
        let _ = queues
            .sender(NotificationKind::Event)
            .send(Notification::Event(Value::from(1)))
            .await;

        for task in tasks {
            task.await.unwrap();
        }
        drop(queues);

        assert!(seen_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_handler_drops_silently() {
        let lookup = Arc::new(TestLookup(Mutex::new(CallbackRegistry::new())));
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (queues, tasks) = spawn_workers(1, 16, &cancel_rx, lookup);

        queues
            .sender(NotificationKind::Error)
            .send(Notification::Error(ErrorDescriptor::ConnectionInterrupted))
            .await
            .unwrap();
        drop(queues);

        for task in tasks {
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_in_handler_of_is_scoped() {
        assert!(!in_handler_of(7));
        let inside = ACTIVE_CLIENT.scope(7, async { in_handler_of(7) }).await;
        assert!(inside);
        let other = ACTIVE_CLIENT.scope(7, async { in_handler_of(8) }).await;
        assert!(!other);
    }
}
