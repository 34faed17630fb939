//! Webhook repository.

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::{
    COMMAND_WEBHOOK_LIFETIME_MILLIS, CommandWebhook, IncomingWebhook, OutgoingWebhook,
};

type IncomingRow = (String, i64, i64, i64, String, String, String, String, String);
type OutgoingRow = (String, i64, i64, i64, String, String, String, String, String, String);

const INCOMING_COLUMNS: &str =
    "id, create_at, update_at, delete_at, user_id, channel_id, team_id, display_name, description";

const OUTGOING_COLUMNS: &str = "id, create_at, update_at, delete_at, creator_id, channel_id, \
                                team_id, display_name, trigger_words, callback_urls";

fn row_to_incoming(row: IncomingRow) -> IncomingWebhook {
    IncomingWebhook {
        id: row.0,
        create_at: row.1,
        update_at: row.2,
        delete_at: row.3,
        user_id: row.4,
        channel_id: row.5,
        team_id: row.6,
        display_name: row.7,
        description: row.8,
    }
}

fn row_to_outgoing(row: OutgoingRow) -> Result<OutgoingWebhook, StoreError> {
    Ok(OutgoingWebhook {
        id: row.0,
        create_at: row.1,
        update_at: row.2,
        delete_at: row.3,
        creator_id: row.4,
        channel_id: row.5,
        team_id: row.6,
        display_name: row.7,
        trigger_words: serde_json::from_str(&row.8)?,
        callback_urls: serde_json::from_str(&row.9)?,
    })
}

pub struct WebhookRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> WebhookRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save_incoming(&self, hook: &IncomingWebhook) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO incoming_webhooks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            INCOMING_COLUMNS
        ))
        .bind(&hook.id)
        .bind(hook.create_at)
        .bind(hook.update_at)
        .bind(hook.delete_at)
        .bind(&hook.user_id)
        .bind(&hook.channel_id)
        .bind(&hook.team_id)
        .bind(&hook.display_name)
        .bind(&hook.description)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_outgoing(&self, hook: &OutgoingWebhook) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO outgoing_webhooks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            OUTGOING_COLUMNS
        ))
        .bind(&hook.id)
        .bind(hook.create_at)
        .bind(hook.update_at)
        .bind(hook.delete_at)
        .bind(&hook.creator_id)
        .bind(&hook.channel_id)
        .bind(&hook.team_id)
        .bind(&hook.display_name)
        .bind(serde_json::to_string(&hook.trigger_words)?)
        .bind(serde_json::to_string(&hook.callback_urls)?)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Live incoming webhooks posting into a channel.
    pub async fn get_incoming_by_channel(
        &self,
        channel_id: &str,
    ) -> Result<Vec<IncomingWebhook>, StoreError> {
        let rows = sqlx::query_as::<_, IncomingRow>(&format!(
            "SELECT {} FROM incoming_webhooks WHERE channel_id = ? AND delete_at = 0",
            INCOMING_COLUMNS
        ))
        .bind(channel_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_incoming).collect())
    }

    /// Live outgoing webhooks watching a channel.
    pub async fn get_outgoing_by_channel(
        &self,
        channel_id: &str,
    ) -> Result<Vec<OutgoingWebhook>, StoreError> {
        let rows = sqlx::query_as::<_, OutgoingRow>(&format!(
            "SELECT {} FROM outgoing_webhooks WHERE channel_id = ? AND delete_at = 0",
            OUTGOING_COLUMNS
        ))
        .bind(channel_id)
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(row_to_outgoing).collect()
    }

    pub async fn delete_incoming(&self, id: &str, now: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE incoming_webhooks SET delete_at = ?, update_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_outgoing(&self, id: &str, now: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE outgoing_webhooks SET delete_at = ?, update_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_incoming(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM incoming_webhooks WHERE delete_at = 0",
        )
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    pub async fn count_outgoing(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM outgoing_webhooks WHERE delete_at = 0",
        )
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    /// Re-home a channel's webhooks onto a new team after a channel move.
    pub async fn update_team_for_channel(
        &self,
        channel_id: &str,
        team_id: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE incoming_webhooks SET team_id = ?, update_at = ? WHERE channel_id = ?",
        )
        .bind(team_id)
        .bind(now)
        .bind(channel_id)
        .execute(self.pool)
        .await?;
        sqlx::query(
            "UPDATE outgoing_webhooks SET team_id = ?, update_at = ? WHERE channel_id = ?",
        )
        .bind(team_id)
        .bind(now)
        .bind(channel_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_command_webhook(&self, hook: &CommandWebhook) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO command_webhooks (id, create_at, command_id, user_id, channel_id, \
             root_id, use_count) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&hook.id)
        .bind(hook.create_at)
        .bind(&hook.command_id)
        .bind(&hook.user_id)
        .bind(&hook.channel_id)
        .bind(&hook.root_id)
        .bind(hook.use_count)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Claim one use of a command webhook. Fails once the slot is spent or
    /// expired so a leaked response URL cannot be replayed.
    pub async fn try_use_command_webhook(
        &self,
        id: &str,
        max_uses: i64,
        now: i64,
    ) -> Result<CommandWebhook, StoreError> {
        let result = sqlx::query(
            "UPDATE command_webhooks SET use_count = use_count + 1 \
             WHERE id = ? AND use_count < ? AND create_at > ?",
        )
        .bind(id)
        .bind(max_uses)
        .bind(now - COMMAND_WEBHOOK_LIFETIME_MILLIS)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("command webhook", id));
        }
        let row = sqlx::query_as::<_, (String, i64, String, String, String, String, i64)>(
            "SELECT id, create_at, command_id, user_id, channel_id, root_id, use_count \
             FROM command_webhooks WHERE id = ?",
        )
        .bind(id)
        .fetch_one(self.pool)
        .await?;
        Ok(CommandWebhook {
            id: row.0,
            create_at: row.1,
            command_id: row.2,
            user_id: row.3,
            channel_id: row.4,
            root_id: row.5,
            use_count: row.6,
        })
    }

    /// Drop command webhooks past their lifetime. Returns rows removed.
    pub async fn cleanup_command_webhooks(&self, now: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM command_webhooks WHERE create_at <= ?")
            .bind(now - COMMAND_WEBHOOK_LIFETIME_MILLIS)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
