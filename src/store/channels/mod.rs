//! Channel repository: channel rows here, membership in [`members`].

mod members;

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::{Channel, ChannelMember, ChannelType};

type ChannelRow = (
    String,         // id
    i64,            // create_at
    i64,            // update_at
    i64,            // delete_at
    String,         // team_id
    String,         // channel_type
    String,         // display_name
    String,         // name
    String,         // header
    String,         // purpose
    String,         // creator_id
    Option<String>, // scheme_id
    bool,           // group_constrained
    i64,            // total_msg_count
    i64,            // last_post_at
);

const CHANNEL_COLUMNS: &str = "id, create_at, update_at, delete_at, team_id, channel_type, \
     display_name, name, header, purpose, creator_id, scheme_id, group_constrained, \
     total_msg_count, last_post_at";

fn row_to_channel(row: ChannelRow) -> Result<Channel, StoreError> {
    let channel_type = ChannelType::from_str_tag(&row.5)
        .ok_or_else(|| StoreError::not_found("channel type", row.5.clone()))?;
    Ok(Channel {
        id: row.0,
        create_at: row.1,
        update_at: row.2,
        delete_at: row.3,
        team_id: row.4,
        channel_type,
        display_name: row.6,
        name: row.7,
        header: row.8,
        purpose: row.9,
        creator_id: row.10,
        scheme_id: row.11,
        group_constrained: row.12,
        total_msg_count: row.13,
        last_post_at: row.14,
    })
}

/// Repository for channel and channel-membership rows.
pub struct ChannelRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChannelRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub(super) fn pool(&self) -> &'a SqlitePool {
        self.pool
    }

    /// Insert a new channel. The unique (team, name) index turns racing
    /// creates of the same canonical name into a conflict the caller can
    /// resolve by fetching the winner.
    pub async fn save(&self, channel: &Channel) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO channels (id, create_at, update_at, delete_at, team_id, channel_type,
                                  display_name, name, header, purpose, creator_id, scheme_id,
                                  group_constrained, total_msg_count, last_post_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&channel.id)
        .bind(channel.create_at)
        .bind(channel.update_at)
        .bind(channel.delete_at)
        .bind(&channel.team_id)
        .bind(channel.channel_type.as_str())
        .bind(&channel.display_name)
        .bind(&channel.name)
        .bind(&channel.header)
        .bind(&channel.purpose)
        .bind(&channel.creator_id)
        .bind(&channel.scheme_id)
        .bind(channel.group_constrained)
        .bind(channel.total_msg_count)
        .bind(channel.last_post_at)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("channel", channel.name.clone());
            }
            StoreError::from(e)
        })?;
        Ok(())
    }

    /// Create a direct channel together with both membership rows in one
    /// transaction. Losing a racing create surfaces as a conflict on the
    /// channel's canonical name; the caller fetches the winner.
    pub async fn save_direct_channel(
        &self,
        channel: &Channel,
        member_a: &ChannelMember,
        member_b: &ChannelMember,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO channels (id, create_at, update_at, delete_at, team_id, channel_type,
                                  display_name, name, header, purpose, creator_id, scheme_id,
                                  group_constrained, total_msg_count, last_post_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&channel.id)
        .bind(channel.create_at)
        .bind(channel.update_at)
        .bind(channel.delete_at)
        .bind(&channel.team_id)
        .bind(channel.channel_type.as_str())
        .bind(&channel.display_name)
        .bind(&channel.name)
        .bind(&channel.header)
        .bind(&channel.purpose)
        .bind(&channel.creator_id)
        .bind(&channel.scheme_id)
        .bind(channel.group_constrained)
        .bind(channel.total_msg_count)
        .bind(channel.last_post_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("channel", channel.name.clone());
            }
            StoreError::from(e)
        })?;
        // Self-DMs carry the same user twice; one member row suffices.
        let mut members = vec![member_a];
        if member_a.user_id != member_b.user_id {
            members.push(member_b);
        }
        for member in members {
            let notify_props = serde_json::to_string(&member.notify_props)?;
            sqlx::query(
                r#"
                INSERT INTO channel_members (channel_id, user_id, roles, last_viewed_at,
                                             msg_count, mention_count, notify_props,
                                             last_update_at, scheme_user, scheme_admin,
                                             scheme_guest)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&channel.id)
            .bind(&member.user_id)
            .bind(&member.roles)
            .bind(member.last_viewed_at)
            .bind(member.msg_count)
            .bind(member.mention_count)
            .bind(&notify_props)
            .bind(member.last_update_at)
            .bind(member.scheme_user)
            .bind(member.scheme_admin)
            .bind(member.scheme_guest)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn update(&self, channel: &Channel) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE channels
            SET update_at = ?, delete_at = ?, channel_type = ?, display_name = ?, name = ?,
                header = ?, purpose = ?, scheme_id = ?, group_constrained = ?
            WHERE id = ?
            "#,
        )
        .bind(channel.update_at)
        .bind(channel.delete_at)
        .bind(channel.channel_type.as_str())
        .bind(&channel.display_name)
        .bind(&channel.name)
        .bind(&channel.header)
        .bind(&channel.purpose)
        .bind(&channel.scheme_id)
        .bind(channel.group_constrained)
        .bind(&channel.id)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("channel", channel.name.clone());
            }
            StoreError::from(e)
        })?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("channel", channel.id.clone()));
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Channel, StoreError> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {} FROM channels WHERE id = ?",
            CHANNEL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("channel", id))?;
        row_to_channel(row)
    }

    pub async fn get_by_name(
        &self,
        team_id: &str,
        name: &str,
        include_deleted: bool,
    ) -> Result<Channel, StoreError> {
        let query = if include_deleted {
            format!("SELECT {} FROM channels WHERE team_id = ? AND name = ?", CHANNEL_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM channels WHERE team_id = ? AND name = ? AND delete_at = 0",
                CHANNEL_COLUMNS
            )
        };
        let row = sqlx::query_as::<_, ChannelRow>(&query)
            .bind(team_id)
            .bind(name)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("channel", name))?;
        row_to_channel(row)
    }

    /// Soft-delete (archive) a channel.
    pub async fn set_delete_at(&self, channel_id: &str, delete_at: i64, now: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE channels SET delete_at = ?, update_at = ? WHERE id = ?")
            .bind(delete_at)
            .bind(now)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("channel", channel_id));
        }
        Ok(())
    }

    /// Re-home a channel onto another team.
    pub async fn update_team_id(
        &self,
        channel_id: &str,
        team_id: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE channels SET team_id = ?, update_at = ? WHERE id = ?")
            .bind(team_id)
            .bind(now)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("channel", channel_id));
        }
        Ok(())
    }

    pub async fn count_for_team(&self, team_id: &str) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM channels WHERE team_id = ? AND delete_at = 0",
        )
        .bind(team_id)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    /// Server-wide live channel count for one type.
    pub async fn count_by_type(&self, channel_type: ChannelType) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM channels WHERE channel_type = ? AND delete_at = 0",
        )
        .bind(channel_type.as_str())
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    /// Bump the post counters after a post lands.
    pub async fn increment_msg_count(&self, channel_id: &str, at: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE channels SET total_msg_count = total_msg_count + 1, last_post_at = ? WHERE id = ?",
        )
        .bind(at)
        .bind(channel_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}
