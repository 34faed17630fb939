//! Cluster seam: the interface other nodes are reached through, and the
//! store-backed node discovery service.
//!
//! Clustering ships as an injected trait so a single-node deployment pays
//! nothing: the default [`LocalCluster`] is always the leader and drops
//! outbound messages.

mod discovery;

pub use discovery::ClusterDiscoveryService;

/// Mirror of a locally published websocket event; peers rebroadcast it to
/// their own connections.
pub const CLUSTER_EVENT_PUBLISH: &str = "publish";

/// A user's cached memberships and sessions went stale on the sender.
pub const CLUSTER_EVENT_INVALIDATE_USER: &str = "invalidate_user";

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// A message mirrored to peer nodes, best effort. Loss is acceptable;
/// receivers treat the payload as advisory state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ClusterMessage {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Inter-node communication surface.
#[async_trait]
pub trait Cluster: Send + Sync {
    fn start(&self);
    fn stop(&self);
    /// Whether this node currently holds leadership.
    fn is_leader(&self) -> bool;
    /// Best-effort fan-out to every peer; implementations log failures.
    async fn send_message(&self, msg: ClusterMessage);
    /// 0 is healthy; larger values mean degraded inter-node links.
    fn health_score(&self) -> i32;
}

/// Single-node stand-in used when clustering is off or unlicensed.
#[derive(Debug, Default)]
pub struct LocalCluster;

#[async_trait]
impl Cluster for LocalCluster {
    fn start(&self) {}

    fn stop(&self) {}

    fn is_leader(&self) -> bool {
        true
    }

    async fn send_message(&self, msg: ClusterMessage) {
        crate::metrics::record_cluster_event(&msg.event);
        trace!(event = %msg.event, "dropping cluster message on single-node deployment");
    }

    fn health_score(&self) -> i32 {
        0
    }
}
