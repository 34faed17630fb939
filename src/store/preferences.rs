//! Preference repository.

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::Preference;

pub struct PreferenceRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PreferenceRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a batch of preferences atomically.
    pub async fn save(&self, preferences: &[Preference]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for pref in preferences {
            sqlx::query(
                r#"
                INSERT INTO preferences (user_id, category, name, value)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (user_id, category, name) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(&pref.user_id)
            .bind(&pref.category)
            .bind(&pref.name)
            .bind(&pref.value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(
        &self,
        user_id: &str,
        category: &str,
        name: &str,
    ) -> Result<Preference, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT user_id, category, name, value FROM preferences \
             WHERE user_id = ? AND category = ? AND name = ?",
        )
        .bind(user_id)
        .bind(category)
        .bind(name)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("preference", name))?;
        Ok(Preference { user_id: row.0, category: row.1, name: row.2, value: row.3 })
    }

}
