//! Push notification fan-out.
//!
//! Notifications are queued onto a bounded channel and drained by a fixed
//! worker pool so a slow proxy never blocks the caller. The transport is an
//! injected [`PushProvider`]; the default provider logs instead of talking
//! to a push proxy. `stop()` closes the queue and the workers exit once the
//! backlog is drained.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::AppResult;

pub const PUSH_TYPE_MESSAGE: &str = "message";
pub const PUSH_TYPE_CLEAR: &str = "clear";
pub const PUSH_TYPE_SESSION_EXPIRED: &str = "session_expired";

const PUSH_WORKERS: usize = 8;
const PUSH_QUEUE_BUFFER_PER_WORKER: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct PushNotification {
    pub user_id: String,
    #[serde(rename = "type")]
    pub push_type: String,
    pub message: String,
    pub channel_id: String,
}

impl PushNotification {
    pub fn new(user_id: &str, push_type: &str, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.to_string(),
            push_type: push_type.to_string(),
            message: message.into(),
            channel_id: String::new(),
        }
    }
}

/// Push transport. Delivery is best-effort; errors are logged by the worker.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, notification: &PushNotification) -> AppResult<()>;
}

/// Default transport: logs the notification instead of delivering it.
#[derive(Debug, Default)]
pub struct LogPushProvider;

#[async_trait]
impl PushProvider for LogPushProvider {
    async fn send(&self, notification: &PushNotification) -> AppResult<()> {
        debug!(
            user_id = %notification.user_id,
            push_type = %notification.push_type,
            "push delivery skipped (log provider)"
        );
        Ok(())
    }
}

/// Worker pool draining queued notifications through the provider.
pub struct PushService {
    tx: Mutex<Option<mpsc::Sender<PushNotification>>>,
}

impl PushService {
    /// Spawn the worker pool onto `tracker` and return the queue handle.
    pub fn start(provider: Arc<dyn PushProvider>, tracker: &TaskTracker) -> Self {
        let (tx, rx) = mpsc::channel(PUSH_WORKERS * PUSH_QUEUE_BUFFER_PER_WORKER);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker in 0..PUSH_WORKERS {
            let rx = rx.clone();
            let provider = provider.clone();
            tracker.spawn(async move {
                loop {
                    // Hold the receiver lock only for a single recv so the
                    // pool shares one queue.
                    let notification = { rx.lock().await.recv().await };
                    let Some(notification) = notification else {
                        break;
                    };
                    if let Err(err) = provider.send(&notification).await {
                        warn!(
                            worker,
                            user_id = %notification.user_id,
                            error = %err,
                            "push delivery failed"
                        );
                    }
                }
                debug!(worker, "push worker drained");
            });
        }
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Queue a notification. Dropped with a warning when the queue is full
    /// or the service is already stopped.
    pub fn send(&self, notification: PushNotification) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            debug!(user_id = %notification.user_id, "push service stopped, dropping notification");
            return;
        };
        if let Err(err) = tx.try_send(notification) {
            warn!(error = %err, "push queue full, dropping notification");
        }
    }

    /// Close the queue. Workers finish the backlog and exit; completion is
    /// observed through the task tracker. Idempotent.
    pub fn stop(&self) {
        self.tx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl PushProvider for CountingProvider {
        async fn send(&self, _notification: &PushNotification) -> AppResult<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn backlog_is_drained_before_workers_exit() {
        let provider = Arc::new(CountingProvider::default());
        let tracker = TaskTracker::new();
        let service = PushService::start(provider.clone(), &tracker);

        for i in 0..40 {
            service.send(PushNotification::new(
                &format!("user{i}"),
                PUSH_TYPE_MESSAGE,
                "hello",
            ));
        }
        service.stop();
        tracker.close();
        tracker.wait().await;
        assert_eq!(provider.delivered.load(Ordering::SeqCst), 40);
    }

    #[tokio::test]
    async fn send_after_stop_is_dropped() {
        let provider = Arc::new(CountingProvider::default());
        let tracker = TaskTracker::new();
        let service = PushService::start(provider.clone(), &tracker);

        service.stop();
        service.stop();
        service.send(PushNotification::new("user1", PUSH_TYPE_CLEAR, ""));
        tracker.close();
        tracker.wait().await;
        assert_eq!(provider.delivered.load(Ordering::SeqCst), 0);
    }
}
