//! One-shot token repository (invites, verifications).

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::{new_id, now_millis};

/// Tokens older than this are eligible for cleanup.
pub const TOKEN_MAX_AGE_MILLIS: i64 = 48 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct Token {
    pub token: String,
    pub create_at: i64,
    pub token_type: String,
    pub extra: String,
}

impl Token {
    pub fn new(token_type: &str, extra: String) -> Self {
        Self {
            token: format!("{}{}", new_id(), new_id()),
            create_at: now_millis(),
            token_type: token_type.to_string(),
            extra,
        }
    }
}

pub struct TokenRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TokenRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, token: &Token) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tokens (token, create_at, token_type, extra) VALUES (?, ?, ?, ?)",
        )
        .bind(&token.token)
        .bind(token.create_at)
        .bind(&token.token_type)
        .bind(&token.extra)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("token", token.token_type.clone());
            }
            StoreError::from(e)
        })?;
        Ok(())
    }

    pub async fn get(&self, token: &str) -> Result<Token, StoreError> {
        let row = sqlx::query_as::<_, (String, i64, String, String)>(
            "SELECT token, create_at, token_type, extra FROM tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("token", "<token>"))?;
        Ok(Token { token: row.0, create_at: row.1, token_type: row.2, extra: row.3 })
    }

    pub async fn cleanup(&self, now: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tokens WHERE create_at <= ?")
            .bind(now - TOKEN_MAX_AGE_MILLIS)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
