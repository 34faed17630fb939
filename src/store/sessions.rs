//! Session repository.

use sqlx::SqlitePool;
use std::collections::BTreeMap;

use super::StoreError;
use crate::model::Session;

type SessionRow = (String, String, i64, i64, i64, String, String, String, String, bool);

const SESSION_COLUMNS: &str = "id, token, create_at, expires_at, last_activity_at, user_id, \
                               device_id, roles, props, expired_notify";

fn row_to_session(row: SessionRow) -> Result<Session, StoreError> {
    let props: BTreeMap<String, String> = serde_json::from_str(&row.8)?;
    Ok(Session {
        id: row.0,
        token: row.1,
        create_at: row.2,
        expires_at: row.3,
        last_activity_at: row.4,
        user_id: row.5,
        device_id: row.6,
        roles: row.7,
        props,
        expired_notify: row.9,
    })
}

pub struct SessionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SessionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let props = serde_json::to_string(&session.props)?;
        sqlx::query(
            r#"
            INSERT INTO sessions (id, token, create_at, expires_at, last_activity_at,
                                  user_id, device_id, roles, props, expired_notify)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.token)
        .bind(session.create_at)
        .bind(session.expires_at)
        .bind(session.last_activity_at)
        .bind(&session.user_id)
        .bind(&session.device_id)
        .bind(&session.roles)
        .bind(&props)
        .bind(session.expired_notify)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("session", session.id.clone());
            }
            StoreError::from(e)
        })?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Session, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("session", id))?;
        row_to_session(row)
    }

    pub async fn get_by_token(&self, token: &str) -> Result<Session, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM sessions WHERE token = ?",
            SESSION_COLUMNS
        ))
        .bind(token)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("session", "<token>"))?;
        row_to_session(row)
    }

    pub async fn update_last_activity(
        &self,
        session_id: &str,
        at: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET last_activity_at = ? WHERE id = ?")
            .bind(at)
            .bind(session_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Sessions that expired within the trailing `within` window and have
    /// not had their expiry notification sent.
    pub async fn get_expired_unnotified(
        &self,
        now: i64,
        within: i64,
    ) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT {} FROM sessions
            WHERE expires_at > 0 AND expires_at <= ? AND expires_at >= ?
              AND expired_notify = 0
            "#,
            SESSION_COLUMNS
        ))
        .bind(now)
        .bind(now - within)
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(row_to_session).collect()
    }

    pub async fn update_expired_notify(
        &self,
        session_id: &str,
        notified: bool,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET expired_notify = ? WHERE id = ?")
            .bind(notified)
            .bind(session_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Delete up to `batch` expired sessions; returns rows removed. The
    /// reaper loops until a batch comes back short.
    pub async fn cleanup_expired(&self, now: i64, batch: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE id IN (
                SELECT id FROM sessions
                WHERE expires_at > 0 AND expires_at <= ?
                LIMIT ?
            )
            "#,
        )
        .bind(now)
        .bind(batch)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sessions")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}
