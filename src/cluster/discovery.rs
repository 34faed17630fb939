//! Store-backed node presence.
//!
//! Each node keeps one row in `cluster_discovery` alive by pinging it every
//! minute. Peers list the rows to learn the live topology; rows past the
//! offline cutoff are swept at startup and by the periodic cleanup job.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::model::now_millis;
use crate::store::{ClusterDiscoveryRow, Store, DISCOVERY_TYPE_APP};

/// How often the writer task refreshes this node's row.
pub const DISCOVERY_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Keeps this node's presence row alive until stopped.
pub struct ClusterDiscoveryService {
    row: ClusterDiscoveryRow,
    store: Store,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl ClusterDiscoveryService {
    pub fn new(cluster_name: &str, hostname: &str, gossip_port: u16, store: Store) -> Self {
        Self {
            row: ClusterDiscoveryRow::new(DISCOVERY_TYPE_APP, cluster_name, hostname, gossip_port),
            store,
            stop: Mutex::new(None),
        }
    }

    /// Sweeps stale rows, replaces any previous row for this node, and
    /// spawns the ping task.
    pub async fn start(&self, tracker: &TaskTracker) -> AppResult<()> {
        let cluster = self.store.cluster();
        match cluster.cleanup(now_millis()).await {
            Ok(0) => {}
            Ok(swept) => debug!(swept, "removed stale discovery rows"),
            Err(err) => warn!(error = %err, "discovery cleanup failed"),
        }

        // A leftover row from a previous run of this node is replaced, not
        // refreshed, so create_at reflects the current process.
        if let Err(err) = cluster
            .delete(
                &self.row.discovery_type,
                &self.row.cluster_name,
                &self.row.hostname,
            )
            .await
        {
            warn!(error = %err, "removing previous discovery row failed");
        }
        cluster.save(&self.row).await.map_err(AppError::from)?;
        info!(
            cluster_name = %self.row.cluster_name,
            hostname = %self.row.hostname,
            "cluster discovery started"
        );

        let (stop_tx, mut stop_rx) = oneshot::channel();
        *self.stop.lock() = Some(stop_tx);

        let row = self.row.clone();
        let store = self.store.clone();
        tracker.spawn(async move {
            let mut tick = tokio::time::interval(DISCOVERY_PING_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick fires immediately; skip it, the row
            // was just saved.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tick.tick() => {
                        let ping = store
                            .cluster()
                            .set_last_ping(
                                &row.discovery_type,
                                &row.cluster_name,
                                &row.hostname,
                                now_millis(),
                            )
                            .await;
                        if let Err(err) = ping {
                            warn!(error = %err, "discovery ping failed");
                        }
                    }
                }
            }
            match store
                .cluster()
                .delete(&row.discovery_type, &row.cluster_name, &row.hostname)
                .await
            {
                Ok(_) => debug!(hostname = %row.hostname, "discovery row removed"),
                Err(err) => warn!(error = %err, "removing discovery row at stop failed"),
            }
        });
        Ok(())
    }

    /// Signals the ping task to delete this node's row and exit. Safe to
    /// call more than once.
    pub fn stop(&self) {
        if let Some(stop_tx) = self.stop.lock().take() {
            let _ = stop_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_publishes_row_and_stop_removes_it() {
        let store = Store::new(":memory:").await.unwrap();
        let tracker = TaskTracker::new();

        // A row left behind by a previous run of the same node.
        let leftover = ClusterDiscoveryRow::new(DISCOVERY_TYPE_APP, "prod", "node-a", 8074);
        store.cluster().save(&leftover).await.unwrap();

        let service = ClusterDiscoveryService::new("prod", "node-a", 8074, store.clone());
        service.start(&tracker).await.unwrap();
        let rows = store
            .cluster()
            .get_all(DISCOVERY_TYPE_APP, "prod", now_millis())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hostname, "node-a");
        assert_eq!(rows[0].id, service.row.id);

        service.stop();
        service.stop(); // idempotent
        tracker.close();
        tracker.wait().await;
        let rows = store
            .cluster()
            .get_all(DISCOVERY_TYPE_APP, "prod", now_millis())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ping_task_refreshes_last_ping() {
        let store = Store::new(":memory:").await.unwrap();
        let tracker = TaskTracker::new();

        let service = ClusterDiscoveryService::new("prod", "node-b", 8074, store.clone());
        service.start(&tracker).await.unwrap();

        // Backdate the row; the next ping must move last_ping_at forward.
        let stale = now_millis() - 10_000;
        store
            .cluster()
            .set_last_ping(DISCOVERY_TYPE_APP, "prod", "node-b", stale)
            .await
            .unwrap();

        tokio::time::sleep(DISCOVERY_PING_INTERVAL + Duration::from_secs(1)).await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let rows = store
                .cluster()
                .get_all(DISCOVERY_TYPE_APP, "prod", now_millis())
                .await
                .unwrap();
            if rows[0].last_ping_at > stale {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "ping never landed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        service.stop();
        tracker.close();
        tracker.wait().await;
    }
}
