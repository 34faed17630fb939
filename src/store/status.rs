//! Presence status repository. The in-process cache fronts this table;
//! writes land here so statuses survive restarts and feed other nodes.

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::{Status, StatusState};

type StatusRow = (String, String, bool, i64, String);

fn row_to_status(row: StatusRow) -> Result<Status, StoreError> {
    let status = StatusState::from_str_tag(&row.1)
        .ok_or_else(|| StoreError::not_found("status state", row.1.clone()))?;
    Ok(Status {
        user_id: row.0,
        status,
        manual: row.2,
        last_activity_at: row.3,
        active_channel: row.4,
    })
}

pub struct StatusRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> StatusRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, status: &Status) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO statuses (user_id, status, manual, last_activity_at, active_channel)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                status = excluded.status,
                manual = excluded.manual,
                last_activity_at = excluded.last_activity_at,
                active_channel = excluded.active_channel
            "#,
        )
        .bind(&status.user_id)
        .bind(status.status.as_str())
        .bind(status.manual)
        .bind(status.last_activity_at)
        .bind(&status.active_channel)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, user_id: &str) -> Result<Status, StoreError> {
        let row = sqlx::query_as::<_, StatusRow>(
            "SELECT user_id, status, manual, last_activity_at, active_channel \
             FROM statuses WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("status", user_id))?;
        row_to_status(row)
    }

    pub async fn get_many(&self, user_ids: &[String]) -> Result<Vec<Status>, StoreError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; user_ids.len()].join(", ");
        let query = format!(
            "SELECT user_id, status, manual, last_activity_at, active_channel \
             FROM statuses WHERE user_id IN ({})",
            placeholders
        );
        let mut q = sqlx::query_as::<_, StatusRow>(&query);
        for id in user_ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(self.pool).await?;
        rows.into_iter().map(row_to_status).collect()
    }

    /// Users with any activity at or after `since`; feeds the daily and
    /// monthly active analytics rows.
    pub async fn count_active_since(&self, since: i64) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM statuses WHERE last_activity_at >= ?",
        )
        .bind(since)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    /// Bulk-reset every row to offline; used at startup so presence never
    /// reflects a previous process's connections.
    pub async fn reset_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE statuses SET status = 'offline', manual = 0 WHERE manual = 0",
        )
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
