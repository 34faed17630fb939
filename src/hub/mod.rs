//! Per-user event fan-out.
//!
//! A fixed bank of hubs is created at startup, one per hardware thread. A
//! user id maps to exactly one hub via a seeded hash, so all of a user's
//! connections live on the same hub and per-user delivery stays ordered.
//! Each hub is a single task owning its connection map; registrations,
//! unregistrations, broadcasts, and membership invalidations arrive over
//! bounded channels and are applied inside the loop.

mod conn;

pub use conn::{run as run_connection, ConnHandle, WebConn};

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::store::Store;
use crate::ws::events::EVENT_HELLO;
use crate::ws::{Broadcast, PrecomputedEvent, WebSocketEvent};

const REGISTER_QUEUE_SIZE: usize = 256;
const BROADCAST_QUEUE_SIZE: usize = 4096;

/// The bank of hubs plus the seed for user-to-hub placement.
pub struct HubSet {
    hubs: Vec<Hub>,
    seed: u64,
}

impl HubSet {
    /// Spawns `max(available_parallelism, 1)` hubs onto the tracker.
    ///
    /// `disconnect_tx` receives a user id whenever that user's last
    /// connection goes away, so the presence layer can flip them offline.
    pub fn new(
        store: Store,
        server_version: String,
        disconnect_tx: mpsc::Sender<String>,
        tracker: &TaskTracker,
    ) -> Self {
        let count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let seed: u64 = rand::random();
        let hubs = (0..count)
            .map(|index| {
                Hub::spawn(
                    index,
                    store.clone(),
                    server_version.clone(),
                    disconnect_tx.clone(),
                    tracker,
                )
            })
            .collect();
        debug!(hubs = count, "hub bank started");
        Self { hubs, seed }
    }

    /// Stable in-process placement; the per-process seed keeps placement
    /// from colliding across nodes.
    fn hub_index(&self, user_id: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.seed.hash(&mut hasher);
        user_id.hash(&mut hasher);
        (hasher.finish() % self.hubs.len() as u64) as usize
    }

    pub fn hub_for(&self, user_id: &str) -> &Hub {
        &self.hubs[self.hub_index(user_id)]
    }

    pub fn hub_count(&self) -> usize {
        self.hubs.len()
    }

    pub async fn register(&self, handle: ConnHandle) {
        let user_id = handle.user_id.clone();
        self.hub_for(&user_id).register(handle).await;
    }

    pub async fn unregister(&self, user_id: &str, conn_id: &str) {
        self.hub_for(user_id).unregister(conn_id).await;
    }

    /// Routes an event to the owning hub when user-targeted, otherwise to
    /// every hub.
    pub async fn publish(&self, event: WebSocketEvent) {
        crate::metrics::record_ws_event(event.event);
        let pre = event.precompute();
        if pre.broadcast.user_id.is_empty() {
            for hub in &self.hubs {
                hub.broadcast(pre.clone()).await;
            }
        } else {
            let user_id = pre.broadcast.user_id.clone();
            self.hub_for(&user_id).broadcast(pre).await;
        }
    }

    /// Tells the owning hub that `user_id`'s membership sets are stale.
    pub async fn invalidate_user(&self, user_id: &str) {
        self.hub_for(user_id).invalidate_user(user_id).await;
    }

    /// Stops every hub. Conn tasks die when their handles are cancelled;
    /// events still in flight are dropped.
    pub fn stop(&self) {
        for hub in &self.hubs {
            hub.stop();
        }
    }
}

struct Unregister {
    conn_id: String,
}

/// Handle to one hub's event loop.
pub struct Hub {
    register_tx: mpsc::Sender<ConnHandle>,
    unregister_tx: mpsc::Sender<Unregister>,
    broadcast_tx: mpsc::Sender<PrecomputedEvent>,
    invalidate_tx: mpsc::Sender<String>,
    stop: CancellationToken,
}

impl Hub {
    fn spawn(
        index: usize,
        store: Store,
        server_version: String,
        disconnect_tx: mpsc::Sender<String>,
        tracker: &TaskTracker,
    ) -> Self {
        let (register_tx, register_rx) = mpsc::channel(REGISTER_QUEUE_SIZE);
        let (unregister_tx, unregister_rx) = mpsc::channel(REGISTER_QUEUE_SIZE);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE_SIZE);
        let (invalidate_tx, invalidate_rx) = mpsc::channel(REGISTER_QUEUE_SIZE);
        let stop = CancellationToken::new();

        let worker = HubWorker {
            index,
            conns: HashMap::new(),
            store,
            server_version,
            disconnect_tx,
        };
        tracker.spawn(worker.run(
            register_rx,
            unregister_rx,
            broadcast_rx,
            invalidate_rx,
            stop.clone(),
        ));

        Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            invalidate_tx,
            stop,
        }
    }

    async fn register(&self, handle: ConnHandle) {
        if self.register_tx.send(handle).await.is_err() {
            debug!("hub stopped; dropping registration");
        }
    }

    async fn unregister(&self, conn_id: &str) {
        let unreg = Unregister {
            conn_id: conn_id.to_string(),
        };
        let _ = self.unregister_tx.send(unreg).await;
    }

    async fn broadcast(&self, event: PrecomputedEvent) {
        if self.broadcast_tx.send(event).await.is_err() {
            debug!("hub stopped; dropping event");
        }
    }

    async fn invalidate_user(&self, user_id: &str) {
        let _ = self.invalidate_tx.send(user_id.to_string()).await;
    }

    fn stop(&self) {
        self.stop.cancel();
    }
}

/// Loop state; all mutation happens inside `run`.
struct HubWorker {
    index: usize,
    conns: HashMap<String, ConnHandle>,
    store: Store,
    server_version: String,
    disconnect_tx: mpsc::Sender<String>,
}

impl HubWorker {
    async fn run(
        mut self,
        mut register_rx: mpsc::Receiver<ConnHandle>,
        mut unregister_rx: mpsc::Receiver<Unregister>,
        mut broadcast_rx: mpsc::Receiver<PrecomputedEvent>,
        mut invalidate_rx: mpsc::Receiver<String>,
        stop: CancellationToken,
    ) {
        debug!(hub = self.index, "hub started");
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                Some(handle) = register_rx.recv() => self.handle_register(handle),
                Some(unreg) = unregister_rx.recv() => self.drop_conn(&unreg.conn_id),
                Some(event) = broadcast_rx.recv() => self.handle_broadcast(event).await,
                Some(user_id) = invalidate_rx.recv() => self.handle_invalidate(&user_id),
            }
        }
        for handle in self.conns.values() {
            handle.cancel();
        }
        debug!(hub = self.index, "hub stopped");
    }

    fn handle_register(&mut self, mut handle: ConnHandle) {
        crate::metrics::ws_connection_opened();
        debug!(hub = self.index, conn_id = %handle.conn_id, user_id = %handle.user_id, "connection registered");

        let hello = WebSocketEvent::new(EVENT_HELLO, Broadcast::to_user(handle.user_id.clone()))
            .add("server_version", self.server_version.clone())
            .add("connection_id", handle.conn_id.clone())
            .precompute();
        if let Err(err) = handle.send_event(&hello) {
            debug!(conn_id = %handle.conn_id, error = %err, "hello frame not delivered");
        }
        self.conns.insert(handle.conn_id.clone(), handle);
    }

    /// Removes one connection; when it was the user's last, signals the
    /// presence layer.
    fn drop_conn(&mut self, conn_id: &str) {
        let Some(handle) = self.conns.remove(conn_id) else {
            return;
        };
        handle.cancel();
        crate::metrics::ws_connection_closed();
        debug!(hub = self.index, conn_id = %handle.conn_id, user_id = %handle.user_id, "connection unregistered");

        let has_more = self.conns.values().any(|c| c.user_id == handle.user_id);
        if !has_more && self.disconnect_tx.try_send(handle.user_id.clone()).is_err() {
            warn!(user_id = %handle.user_id, "disconnect queue full; offline transition skipped");
        }
    }

    async fn handle_broadcast(&mut self, event: PrecomputedEvent) {
        let store = self.store.clone();
        let mut dead: Vec<String> = Vec::new();
        let mut fanout = 0usize;

        for handle in self.conns.values_mut() {
            if !handle.should_receive(&store, &event).await {
                continue;
            }
            match handle.send_event(&event) {
                Ok(()) => fanout += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(conn_id = %handle.conn_id, user_id = %handle.user_id, "send queue full; shedding connection");
                    crate::metrics::record_broadcast_dropped();
                    dead.push(handle.conn_id.clone());
                }
                Err(TrySendError::Closed(_)) => dead.push(handle.conn_id.clone()),
            }
        }

        for conn_id in dead {
            self.drop_conn(&conn_id);
        }
        crate::metrics::record_event_fanout(fanout);
    }

    fn handle_invalidate(&mut self, user_id: &str) {
        for handle in self.conns.values_mut() {
            if handle.user_id == user_id {
                handle.invalidate_memberships();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::events::EVENT_STATUS_CHANGE;
    use serde_json::Value;
    use std::time::Duration;

    async fn test_hubs() -> (HubSet, mpsc::Receiver<String>, TaskTracker) {
        let store = Store::new(":memory:").await.unwrap();
        let tracker = TaskTracker::new();
        let (disconnect_tx, disconnect_rx) = mpsc::channel(8);
        let hubs = HubSet::new(store, "0.4.0".to_string(), disconnect_tx, &tracker);
        (hubs, disconnect_rx, tracker)
    }

    fn test_handle(conn_id: &str, user_id: &str) -> (ConnHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = ConnHandle::new(
            conn_id.to_string(),
            user_id.to_string(),
            "session1".to_string(),
            tx,
            CancellationToken::new(),
        );
        (handle, rx)
    }

    #[tokio::test]
    async fn register_sends_hello_then_sequences_events() {
        let (hubs, _disconnect_rx, _tracker) = test_hubs().await;
        let (handle, mut rx) = test_handle("conn1", "user1");
        hubs.register(handle).await;

        let hello: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(hello["event"], "hello");
        assert_eq!(hello["seq"], 1);
        assert_eq!(hello["data"]["server_version"], "0.4.0");

        hubs.publish(
            WebSocketEvent::new(EVENT_STATUS_CHANGE, Broadcast::to_user("user1"))
                .add("status", "online"),
        )
        .await;
        let event: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["event"], "status_change");
        assert_eq!(event["seq"], 2);

        hubs.stop();
    }

    #[tokio::test]
    async fn user_targeting_excludes_other_users() {
        let (hubs, _disconnect_rx, _tracker) = test_hubs().await;
        let (handle, mut rx) = test_handle("conn1", "user1");
        hubs.register(handle).await;
        let _hello = rx.recv().await.unwrap();

        hubs.publish(
            WebSocketEvent::new(EVENT_STATUS_CHANGE, Broadcast::to_user("someone-else"))
                .add("status", "away"),
        )
        .await;
        // An all-targeted event arrives next, proving the user-targeted one
        // was filtered rather than still queued.
        hubs.publish(WebSocketEvent::new(EVENT_STATUS_CHANGE, Broadcast::all())).await;

        let event: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["broadcast"]["user_id"], "");
        hubs.stop();
    }

    #[tokio::test]
    async fn omitted_users_are_skipped() {
        let (hubs, _disconnect_rx, _tracker) = test_hubs().await;
        let (handle, mut rx) = test_handle("conn1", "user1");
        hubs.register(handle).await;
        let _hello = rx.recv().await.unwrap();

        hubs.publish(WebSocketEvent::new(
            EVENT_STATUS_CHANGE,
            Broadcast::all().omit("user1"),
        ))
        .await;
        hubs.publish(WebSocketEvent::new(EVENT_STATUS_CHANGE, Broadcast::all())).await;

        let event: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert!(event["broadcast"]["omit_users"].is_null());
        hubs.stop();
    }

    #[tokio::test]
    async fn last_unregister_signals_disconnect() {
        let (hubs, mut disconnect_rx, _tracker) = test_hubs().await;
        let (first, mut rx1) = test_handle("conn1", "user1");
        let (second, mut rx2) = test_handle("conn2", "user1");
        hubs.register(first).await;
        hubs.register(second).await;
        let _ = rx1.recv().await.unwrap();
        let _ = rx2.recv().await.unwrap();

        hubs.unregister("user1", "conn1").await;
        // One connection remains; no disconnect signal yet.
        assert!(
            tokio::time::timeout(Duration::from_millis(50), disconnect_rx.recv())
                .await
                .is_err()
        );

        hubs.unregister("user1", "conn2").await;
        let gone = disconnect_rx.recv().await.unwrap();
        assert_eq!(gone, "user1");
        hubs.stop();
    }
}
