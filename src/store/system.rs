//! Systems table: server-scoped key/value rows.

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::SystemRow;

pub struct SystemRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SystemRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, row: &SystemRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO systems (name, value) VALUES (?, ?) \
             ON CONFLICT (name) DO UPDATE SET value = excluded.value",
        )
        .bind(&row.name)
        .bind(&row.value)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Insert only if absent. Returns false when another writer got there
    /// first; first-run stamps rely on this.
    pub async fn save_if_absent(&self, row: &SystemRow) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO systems (name, value) VALUES (?, ?) ON CONFLICT (name) DO NOTHING",
        )
        .bind(&row.name)
        .bind(&row.value)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, name: &str) -> Result<SystemRow, StoreError> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT name, value FROM systems WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("system row", name))?;
        Ok(SystemRow { name: row.0, value: row.1 })
    }

    pub async fn get_optional(&self, name: &str) -> Result<Option<SystemRow>, StoreError> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT name, value FROM systems WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(|r| SystemRow { name: r.0, value: r.1 }))
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM systems WHERE name = ?")
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(())
    }

}
