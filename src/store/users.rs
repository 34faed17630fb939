//! User repository.

use sqlx::SqlitePool;
use std::collections::BTreeMap;

use super::StoreError;
use crate::model::{CustomStatus, User};

type UserRow = (
    String,         // id
    i64,            // create_at
    i64,            // update_at
    i64,            // delete_at
    String,         // username
    String,         // email
    String,         // nickname
    String,         // first_name
    String,         // last_name
    String,         // roles
    String,         // locale
    String,         // notify_props
    bool,           // is_bot
    i64,            // last_picture_update
    Option<String>, // custom_status
);

const USER_COLUMNS: &str = "id, create_at, update_at, delete_at, username, email, nickname, \
     first_name, last_name, roles, locale, notify_props, is_bot, last_picture_update, \
     custom_status";

fn row_to_user(row: UserRow) -> Result<User, StoreError> {
    let notify_props: BTreeMap<String, String> = serde_json::from_str(&row.11)?;
    let custom_status: Option<CustomStatus> = match row.14 {
        Some(ref raw) if !raw.is_empty() => Some(serde_json::from_str(raw)?),
        _ => None,
    };
    Ok(User {
        id: row.0,
        create_at: row.1,
        update_at: row.2,
        delete_at: row.3,
        username: row.4,
        email: row.5,
        nickname: row.6,
        first_name: row.7,
        last_name: row.8,
        roles: row.9,
        locale: row.10,
        notify_props,
        is_bot: row.12,
        last_picture_update: row.13,
        custom_status,
    })
}

/// Repository for user rows.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new user. Username and email collisions surface as conflicts.
    pub async fn save(&self, user: &User) -> Result<(), StoreError> {
        let notify_props = serde_json::to_string(&user.notify_props)?;
        let custom_status = match user.custom_status {
            Some(ref cs) => Some(serde_json::to_string(cs)?),
            None => None,
        };
        sqlx::query(
            r#"
            INSERT INTO users (id, create_at, update_at, delete_at, username, email, nickname,
                               first_name, last_name, roles, locale, notify_props, is_bot,
                               last_picture_update, custom_status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(user.create_at)
        .bind(user.update_at)
        .bind(user.delete_at)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.nickname)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.roles)
        .bind(&user.locale)
        .bind(&notify_props)
        .bind(user.is_bot)
        .bind(user.last_picture_update)
        .bind(custom_status)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("user", user.username.clone());
            }
            StoreError::from(e)
        })?;
        Ok(())
    }

    pub async fn update(&self, user: &User) -> Result<(), StoreError> {
        let notify_props = serde_json::to_string(&user.notify_props)?;
        let custom_status = match user.custom_status {
            Some(ref cs) => Some(serde_json::to_string(cs)?),
            None => None,
        };
        let result = sqlx::query(
            r#"
            UPDATE users
            SET update_at = ?, delete_at = ?, username = ?, email = ?, nickname = ?,
                first_name = ?, last_name = ?, roles = ?, locale = ?, notify_props = ?,
                last_picture_update = ?, custom_status = ?
            WHERE id = ?
            "#,
        )
        .bind(user.update_at)
        .bind(user.delete_at)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.nickname)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.roles)
        .bind(&user.locale)
        .bind(&notify_props)
        .bind(user.last_picture_update)
        .bind(custom_status)
        .bind(&user.id)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user", user.id.clone()));
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("user", id))?;
        row_to_user(row)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE username = ? COLLATE NOCASE",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("user", username))?;
        row_to_user(row)
    }

    /// Fetch a set of users by id; missing ids are silently skipped.
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<User>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let query = format!(
            "SELECT {} FROM users WHERE id IN ({}) ORDER BY username",
            USER_COLUMNS, placeholders
        );
        let mut q = sqlx::query_as::<_, UserRow>(&query);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(self.pool).await?;
        rows.into_iter().map(row_to_user).collect()
    }

    /// Count of non-deleted, non-bot users. Drives the warn-metric checks
    /// and the registered-user analytics value.
    pub async fn count_active(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE delete_at = 0 AND is_bot = 0",
        )
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    /// Profiles carrying the system admin role. The LIKE filter is coarse
    /// on purpose; callers re-check the exact role token before acting on
    /// a profile.
    pub async fn get_system_admins(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE delete_at = 0 AND roles LIKE '%system_admin%' \
             ORDER BY username",
            USER_COLUMNS
        ))
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(row_to_user).collect()
    }

    /// Deactivated accounts.
    pub async fn count_inactive(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE delete_at > 0")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    pub async fn update_custom_status(
        &self,
        user_id: &str,
        custom_status: Option<&CustomStatus>,
        now: i64,
    ) -> Result<(), StoreError> {
        let encoded = match custom_status {
            Some(cs) => Some(serde_json::to_string(cs)?),
            None => None,
        };
        let result =
            sqlx::query("UPDATE users SET custom_status = ?, update_at = ? WHERE id = ?")
                .bind(encoded)
                .bind(now)
                .bind(user_id)
                .execute(self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user", user_id));
        }
        Ok(())
    }

    pub async fn update_last_picture_update(
        &self,
        user_id: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users SET last_picture_update = ?, update_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(user_id)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user", user_id));
        }
        Ok(())
    }

    pub async fn deactivate(&self, user_id: &str, now: i64) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE users SET delete_at = ?, update_at = ? WHERE id = ?")
                .bind(now)
                .bind(now)
                .bind(user_id)
                .execute(self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user", user_id));
        }
        Ok(())
    }

    /// Hard delete. Only the bot-creation rollback uses this; everything
    /// else deactivates.
    pub async fn permanent_delete(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}
