//! Cluster membership configuration.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClusterConfig {
    /// Join a cluster. Off means this node is the sole leader.
    #[serde(default)]
    pub enable: bool,
    /// Name nodes must share to discover each other.
    #[serde(default)]
    pub cluster_name: String,
    /// Port advertised for inter-node gossip.
    #[serde(default = "default_gossip_port")]
    pub gossip_port: u16,
    /// Hostname advertised to peers; empty means the OS hostname.
    #[serde(default)]
    pub override_hostname: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enable: false,
            cluster_name: String::new(),
            gossip_port: default_gossip_port(),
            override_hostname: String::new(),
        }
    }
}

fn default_gossip_port() -> u16 {
    8074
}
