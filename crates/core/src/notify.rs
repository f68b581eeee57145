// Best-effort notification dispatch
//
// Executors never await notification delivery. They hand notifications to
// a NotificationDispatcher, which pushes them onto a bounded queue drained by
// one background task. Delivery failures are logged and dropped; a full or
// closed queue is logged and dropped too. The primary effect of a step never
// depends on whether a notification went out.

use std::sync::Arc;

use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, RuntimeError};
use crate::traits::{Logger, Notification, Notifier};

enum DispatchItem {
    Send(Box<Notification>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background notification worker. Cheap to clone.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<DispatchItem>,
    logger: Arc<dyn Logger>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("capacity", &self.tx.max_capacity())
            .finish()
    }
}

impl NotificationDispatcher {
    /// Spawn the worker task on the current tokio runtime.
    ///
    /// Fails with a configuration error when called outside one.
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        logger: Arc<dyn Logger>,
        capacity: usize,
    ) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            RuntimeError::configuration(format!(
                "notification dispatcher needs a tokio runtime: {}",
                e
            ))
        })?;
        Ok(Self::spawn_on(&handle, notifier, logger, capacity))
    }

    /// Spawn the worker task on the given runtime
    pub fn spawn_on(
        handle: &Handle,
        notifier: Arc<dyn Notifier>,
        logger: Arc<dyn Logger>,
        capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<DispatchItem>(capacity.max(1));
        let worker_logger = logger.clone();

        handle.spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    DispatchItem::Send(notification) => {
                        if let Err(e) = notifier.deliver(&notification).await {
                            worker_logger.warn(
                                "Notification delivery failed",
                                Some(&json!({
                                    "tenantId": notification.tenant_id,
                                    "recipient": notification.recipient,
                                    "type": notification.notification_type,
                                    "error": e.to_string(),
                                })),
                            );
                        }
                    }
                    DispatchItem::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!("Notification dispatcher stopped");
        });

        Self { tx, logger }
    }

    /// Queue a notification without waiting. Returns false when it was dropped.
    pub fn dispatch(&self, notification: Notification) -> bool {
        let recipient = notification.recipient.clone();
        match self.tx.try_send(DispatchItem::Send(Box::new(notification))) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.logger.warn(
                    "Notification queue full, dropping notification",
                    Some(&json!({ "recipient": recipient })),
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.logger.warn(
                    "Notification dispatcher stopped, dropping notification",
                    Some(&json!({ "recipient": recipient })),
                );
                false
            }
        }
    }

    /// Queue several notifications; returns how many were accepted
    pub fn dispatch_all(&self, notifications: impl IntoIterator<Item = Notification>) -> usize {
        notifications
            .into_iter()
            .map(|n| self.dispatch(n))
            .filter(|accepted| *accepted)
            .count()
    }

    /// Wait until every notification queued before this call has been handled
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(DispatchItem::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RecordingNotifier;
    use crate::traits::TracingLogger;

    #[test]
    fn test_spawn_without_runtime_fails() {
        let notifier = Arc::new(RecordingNotifier::new());
        let result = NotificationDispatcher::spawn(notifier, Arc::new(TracingLogger), 8);
        assert!(matches!(result, Err(RuntimeError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_dispatch_and_flush_delivers_in_order() {
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher =
            NotificationDispatcher::spawn(notifier.clone(), Arc::new(TracingLogger), 8).unwrap();

        assert!(dispatcher.dispatch(Notification::in_app("t1", "u1", "A", "first")));
        assert!(dispatcher.dispatch(Notification::email("t1", "x@y.z", "B", "second")));
        dispatcher.flush().await;

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].message, "first");
        assert_eq!(sent[1].recipient, "x@y.z");
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.set_failing(true).await;
        let dispatcher =
            NotificationDispatcher::spawn(notifier.clone(), Arc::new(TracingLogger), 8).unwrap();

        assert!(dispatcher.dispatch(Notification::in_app("t1", "u1", "A", "lost")));
        dispatcher.flush().await;

        assert!(notifier.sent().await.is_empty());
        assert_eq!(notifier.failures().await, 1);
    }

    #[tokio::test]
    async fn test_dispatch_all_counts_accepted() {
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher =
            NotificationDispatcher::spawn(notifier.clone(), Arc::new(TracingLogger), 8).unwrap();

        let accepted = dispatcher.dispatch_all(
            ["u1", "u2", "u3"]
                .iter()
                .map(|u| Notification::in_app("t1", *u, "New lead", "assigned")),
        );
        dispatcher.flush().await;

        assert_eq!(accepted, 3);
        assert_eq!(notifier.sent().await.len(), 3);
    }
}
