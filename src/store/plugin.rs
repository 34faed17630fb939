//! Plugin key/value storage with optional expiry.

use sqlx::SqlitePool;

use super::StoreError;

pub struct PluginKvRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PluginKvRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Unconditional upsert. `expire_at` of 0 means no expiry.
    pub async fn set(
        &self,
        plugin_id: &str,
        key: &str,
        value: &[u8],
        expire_at: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO plugin_key_value (plugin_id, p_key, p_value, expire_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (plugin_id, p_key) DO UPDATE SET
                p_value = excluded.p_value,
                expire_at = excluded.expire_at
            "#,
        )
        .bind(plugin_id)
        .bind(key)
        .bind(value)
        .bind(expire_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Compare-and-set. `old` of None means "only insert if absent or
    /// expired". Returns whether the write happened.
    pub async fn set_with_old_value(
        &self,
        plugin_id: &str,
        key: &str,
        old: Option<&[u8]>,
        value: &[u8],
        expire_at: i64,
        now: i64,
    ) -> Result<bool, StoreError> {
        let result = match old {
            Some(old_value) => {
                sqlx::query(
                    r#"
                    UPDATE plugin_key_value
                    SET p_value = ?, expire_at = ?
                    WHERE plugin_id = ? AND p_key = ? AND p_value = ?
                      AND (expire_at = 0 OR expire_at > ?)
                    "#,
                )
                .bind(value)
                .bind(expire_at)
                .bind(plugin_id)
                .bind(key)
                .bind(old_value)
                .bind(now)
                .execute(self.pool)
                .await?
            }
            None => {
                // Expired rows lose the race to a fresh insert.
                sqlx::query(
                    "DELETE FROM plugin_key_value WHERE plugin_id = ? AND p_key = ? \
                     AND expire_at > 0 AND expire_at <= ?",
                )
                .bind(plugin_id)
                .bind(key)
                .bind(now)
                .execute(self.pool)
                .await?;
                sqlx::query(
                    "INSERT INTO plugin_key_value (plugin_id, p_key, p_value, expire_at) \
                     VALUES (?, ?, ?, ?) ON CONFLICT (plugin_id, p_key) DO NOTHING",
                )
                .bind(plugin_id)
                .bind(key)
                .bind(value)
                .bind(expire_at)
                .execute(self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    /// Fetch a live value; expired rows read as absent.
    pub async fn get(
        &self,
        plugin_id: &str,
        key: &str,
        now: i64,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let value = sqlx::query_scalar::<_, Option<Vec<u8>>>(
            r#"
            SELECT p_value FROM plugin_key_value
            WHERE plugin_id = ? AND p_key = ? AND (expire_at = 0 OR expire_at > ?)
            "#,
        )
        .bind(plugin_id)
        .bind(key)
        .bind(now)
        .fetch_optional(self.pool)
        .await?;
        Ok(value.flatten())
    }

    /// Compare-and-delete. Returns whether a live row matched and was removed.
    pub async fn delete_with_old_value(
        &self,
        plugin_id: &str,
        key: &str,
        old: &[u8],
        now: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM plugin_key_value
            WHERE plugin_id = ? AND p_key = ? AND p_value = ?
              AND (expire_at = 0 OR expire_at > ?)
            "#,
        )
        .bind(plugin_id)
        .bind(key)
        .bind(old)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, plugin_id: &str, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM plugin_key_value WHERE plugin_id = ? AND p_key = ?")
            .bind(plugin_id)
            .bind(key)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_all_for_plugin(&self, plugin_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM plugin_key_value WHERE plugin_id = ?")
            .bind(plugin_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_keys(
        &self,
        plugin_id: &str,
        page: i64,
        per_page: i64,
        now: i64,
    ) -> Result<Vec<String>, StoreError> {
        let keys = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p_key FROM plugin_key_value
            WHERE plugin_id = ? AND (expire_at = 0 OR expire_at > ?)
            ORDER BY p_key
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(plugin_id)
        .bind(now)
        .bind(per_page)
        .bind(page * per_page)
        .fetch_all(self.pool)
        .await?;
        Ok(keys)
    }

    /// Purge expired rows; the cleanup job calls this on its cadence.
    pub async fn delete_expired(&self, now: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM plugin_key_value WHERE expire_at > 0 AND expire_at <= ?",
        )
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
