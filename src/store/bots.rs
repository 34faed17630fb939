//! Bot ownership repository.

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::Bot;

type BotRow = (String, String, String, String, String, i64, i64, i64);

const BOT_COLUMNS: &str =
    "user_id, username, display_name, description, owner_id, create_at, update_at, delete_at";

fn row_to_bot(row: BotRow) -> Bot {
    Bot {
        user_id: row.0,
        username: row.1,
        display_name: row.2,
        description: row.3,
        owner_id: row.4,
        create_at: row.5,
        update_at: row.6,
        delete_at: row.7,
    }
}

pub struct BotRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BotRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, bot: &Bot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bots (user_id, username, display_name, description, owner_id,
                              create_at, update_at, delete_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&bot.user_id)
        .bind(&bot.username)
        .bind(&bot.display_name)
        .bind(&bot.description)
        .bind(&bot.owner_id)
        .bind(bot.create_at)
        .bind(bot.update_at)
        .bind(bot.delete_at)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("bot", bot.user_id.clone());
            }
            StoreError::from(e)
        })?;
        Ok(())
    }

    pub async fn update(&self, bot: &Bot) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bots
            SET username = ?, display_name = ?, description = ?, owner_id = ?,
                update_at = ?, delete_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(&bot.username)
        .bind(&bot.display_name)
        .bind(&bot.description)
        .bind(&bot.owner_id)
        .bind(bot.update_at)
        .bind(bot.delete_at)
        .bind(&bot.user_id)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("bot", bot.user_id.clone()));
        }
        Ok(())
    }

    pub async fn get(&self, user_id: &str) -> Result<Bot, StoreError> {
        let row = sqlx::query_as::<_, BotRow>(&format!(
            "SELECT {} FROM bots WHERE user_id = ?",
            BOT_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("bot", user_id))?;
        Ok(row_to_bot(row))
    }

    /// Bots managed by one owner, live ones first.
    pub async fn get_by_owner(&self, owner_id: &str) -> Result<Vec<Bot>, StoreError> {
        let rows = sqlx::query_as::<_, BotRow>(&format!(
            "SELECT {} FROM bots WHERE owner_id = ? ORDER BY delete_at, create_at",
            BOT_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_bot).collect())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM bots WHERE delete_at = 0")
                .fetch_one(self.pool)
                .await?;
        Ok(count)
    }
}
