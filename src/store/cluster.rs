//! Cluster discovery rows: one per live node, kept fresh by pings.

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::{new_id, now_millis};

/// Discovery row type for application nodes.
pub const DISCOVERY_TYPE_APP: &str = "app_node";

/// A node drops out of discovery reads after this much ping silence.
pub const DISCOVERY_OFFLINE_AFTER_MILLIS: i64 = 30 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct ClusterDiscoveryRow {
    pub id: String,
    pub discovery_type: String,
    pub cluster_name: String,
    pub hostname: String,
    pub gossip_port: u16,
    pub create_at: i64,
    pub last_ping_at: i64,
}

impl ClusterDiscoveryRow {
    pub fn new(discovery_type: &str, cluster_name: &str, hostname: &str, gossip_port: u16) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            discovery_type: discovery_type.to_string(),
            cluster_name: cluster_name.to_string(),
            hostname: hostname.to_string(),
            gossip_port,
            create_at: now,
            last_ping_at: now,
        }
    }
}

pub struct ClusterDiscoveryRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ClusterDiscoveryRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert this node's row; re-registration after a crash refreshes the
    /// existing row instead of erroring.
    pub async fn save(&self, row: &ClusterDiscoveryRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cluster_discovery (id, discovery_type, cluster_name, hostname,
                                           gossip_port, create_at, last_ping_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (discovery_type, cluster_name, hostname) DO UPDATE SET
                gossip_port = excluded.gossip_port,
                last_ping_at = excluded.last_ping_at
            "#,
        )
        .bind(&row.id)
        .bind(&row.discovery_type)
        .bind(&row.cluster_name)
        .bind(&row.hostname)
        .bind(row.gossip_port as i64)
        .bind(row.create_at)
        .bind(row.last_ping_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(
        &self,
        discovery_type: &str,
        cluster_name: &str,
        hostname: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM cluster_discovery \
             WHERE discovery_type = ? AND cluster_name = ? AND hostname = ?",
        )
        .bind(discovery_type)
        .bind(cluster_name)
        .bind(hostname)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Nodes of the cluster whose ping is fresher than the offline cutoff.
    pub async fn get_all(
        &self,
        discovery_type: &str,
        cluster_name: &str,
        now: i64,
    ) -> Result<Vec<ClusterDiscoveryRow>, StoreError> {
        let cutoff = now - DISCOVERY_OFFLINE_AFTER_MILLIS;
        let rows = sqlx::query_as::<_, (String, String, String, String, i64, i64, i64)>(
            r#"
            SELECT id, discovery_type, cluster_name, hostname, gossip_port, create_at,
                   last_ping_at
            FROM cluster_discovery
            WHERE discovery_type = ? AND cluster_name = ? AND last_ping_at > ?
            ORDER BY hostname
            "#,
        )
        .bind(discovery_type)
        .bind(cluster_name)
        .bind(cutoff)
        .fetch_all(self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ClusterDiscoveryRow {
                id: row.0,
                discovery_type: row.1,
                cluster_name: row.2,
                hostname: row.3,
                gossip_port: row.4.clamp(0, u16::MAX as i64) as u16,
                create_at: row.5,
                last_ping_at: row.6,
            })
            .collect())
    }

    pub async fn set_last_ping(
        &self,
        discovery_type: &str,
        cluster_name: &str,
        hostname: &str,
        at: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE cluster_discovery SET last_ping_at = ? \
             WHERE discovery_type = ? AND cluster_name = ? AND hostname = ?",
        )
        .bind(at)
        .bind(discovery_type)
        .bind(cluster_name)
        .bind(hostname)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Remove rows whose ping went stale; the leader runs this on a timer.
    pub async fn cleanup(&self, now: i64) -> Result<u64, StoreError> {
        let cutoff = now - DISCOVERY_OFFLINE_AFTER_MILLIS;
        let result = sqlx::query("DELETE FROM cluster_discovery WHERE last_ping_at <= ?")
            .bind(cutoff)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
