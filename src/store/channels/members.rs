//! Channel membership, join/leave history and unread queries.

use std::collections::BTreeMap;

use super::{ChannelRepository, StoreError};
use crate::model::{ChannelMember, ChannelMemberHistory, ChannelUnread};

type MemberRow = (
    String, // channel_id
    String, // user_id
    String, // roles
    i64,    // last_viewed_at
    i64,    // msg_count
    i64,    // mention_count
    String, // notify_props
    i64,    // last_update_at
    bool,   // scheme_user
    bool,   // scheme_admin
    bool,   // scheme_guest
);

const MEMBER_COLUMNS: &str = "channel_id, user_id, roles, last_viewed_at, msg_count, \
     mention_count, notify_props, last_update_at, scheme_user, scheme_admin, scheme_guest";

fn row_to_member(row: MemberRow) -> Result<ChannelMember, StoreError> {
    let notify_props: BTreeMap<String, String> = serde_json::from_str(&row.6)?;
    Ok(ChannelMember {
        channel_id: row.0,
        user_id: row.1,
        roles: row.2,
        last_viewed_at: row.3,
        msg_count: row.4,
        mention_count: row.5,
        notify_props,
        last_update_at: row.7,
        scheme_user: row.8,
        scheme_admin: row.9,
        scheme_guest: row.10,
    })
}

impl<'a> ChannelRepository<'a> {
    /// Insert a membership row. A second insert for the same (channel,
    /// user) pair is a conflict; racing joins treat that as success.
    pub async fn save_member(&self, member: &ChannelMember) -> Result<(), StoreError> {
        let notify_props = serde_json::to_string(&member.notify_props)?;
        sqlx::query(
            r#"
            INSERT INTO channel_members (channel_id, user_id, roles, last_viewed_at, msg_count,
                                         mention_count, notify_props, last_update_at,
                                         scheme_user, scheme_admin, scheme_guest)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&member.channel_id)
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
        .execute(self.pool())
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("channel member", member.user_id.clone());
            }
            StoreError::from(e)
        })?;
        Ok(())
    }

    pub async fn update_member(&self, member: &ChannelMember) -> Result<(), StoreError> {
        let notify_props = serde_json::to_string(&member.notify_props)?;
        let result = sqlx::query(
            r#"
            UPDATE channel_members
            SET roles = ?, last_viewed_at = ?, msg_count = ?, mention_count = ?,
                notify_props = ?, last_update_at = ?, scheme_user = ?, scheme_admin = ?,
                scheme_guest = ?
            WHERE channel_id = ? AND user_id = ?
            "#,
        )
        .bind(&member.roles)
        .bind(member.last_viewed_at)
        .bind(member.msg_count)
        .bind(member.mention_count)
        .bind(&notify_props)
        .bind(member.last_update_at)
        .bind(member.scheme_user)
        .bind(member.scheme_admin)
        .bind(member.scheme_guest)
        .bind(&member.channel_id)
        .bind(&member.user_id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("channel member", member.user_id.clone()));
        }
        Ok(())
    }

    pub async fn get_member(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<ChannelMember, StoreError> {
        let row = sqlx::query_as::<_, MemberRow>(&format!(
            "SELECT {} FROM channel_members WHERE channel_id = ? AND user_id = ?",
            MEMBER_COLUMNS
        ))
        .bind(channel_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::not_found("channel member", user_id))?;
        row_to_member(row)
    }

    pub async fn get_members(&self, channel_id: &str) -> Result<Vec<ChannelMember>, StoreError> {
        let rows = sqlx::query_as::<_, MemberRow>(&format!(
            "SELECT {} FROM channel_members WHERE channel_id = ? ORDER BY user_id",
            MEMBER_COLUMNS
        ))
        .bind(channel_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_member).collect()
    }

    pub async fn get_member_channel_ids(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT channel_id FROM channel_members WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }

    pub async fn member_count(&self, channel_id: &str) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM channel_members WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    /// How many of the user's channel memberships live on the given team.
    /// Zero means a guest no longer needs the team membership either.
    pub async fn member_count_on_team(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM channel_members
            JOIN channels ON channels.id = channel_members.channel_id
            WHERE channel_members.user_id = ? AND channels.team_id = ? AND channels.delete_at = 0
            "#,
        )
        .bind(user_id)
        .bind(team_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    pub async fn remove_member(&self, channel_id: &str, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM channel_members WHERE channel_id = ? AND user_id = ?")
            .bind(channel_id)
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Mark channels viewed: advance the read cursor to the channel's
    /// current totals and clear mentions. Returns per-channel view times.
    pub async fn update_last_viewed_at(
        &self,
        channel_ids: &[String],
        user_id: &str,
        now: i64,
    ) -> Result<BTreeMap<String, i64>, StoreError> {
        let mut times = BTreeMap::new();
        if channel_ids.is_empty() {
            return Ok(times);
        }
        let mut tx = self.pool().begin().await?;
        for channel_id in channel_ids {
            sqlx::query(
                r#"
                UPDATE channel_members
                SET last_viewed_at = ?, mention_count = 0, last_update_at = ?,
                    msg_count = (SELECT total_msg_count FROM channels WHERE id = ?)
                WHERE channel_id = ? AND user_id = ?
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(channel_id)
            .bind(channel_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            times.insert(channel_id.clone(), now);
        }
        tx.commit().await?;
        Ok(times)
    }

    /// Unread summary derived from channel totals minus the member cursor.
    pub async fn get_unread(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> Result<ChannelUnread, StoreError> {
        let row = sqlx::query_as::<_, (String, String, i64, i64, i64, String)>(
            r#"
            SELECT channels.team_id, channels.id, channels.total_msg_count,
                   channel_members.msg_count, channel_members.mention_count,
                   channel_members.notify_props
            FROM channels
            JOIN channel_members ON channels.id = channel_members.channel_id
            WHERE channels.id = ? AND channel_members.user_id = ?
            "#,
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::not_found("channel member", user_id))?;
        let notify_props: BTreeMap<String, String> = serde_json::from_str(&row.5)?;
        Ok(ChannelUnread {
            team_id: row.0,
            channel_id: row.1,
            msg_count: (row.2 - row.3).max(0),
            mention_count: row.4,
            notify_props,
        })
    }

    // --- join/leave history ---

    /// Record a join. Paired with [`Self::log_leave_event`] at removal.
    pub async fn log_join_event(
        &self,
        channel_id: &str,
        user_id: &str,
        join_time: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO channel_member_history (channel_id, user_id, join_time) VALUES (?, ?, ?)",
        )
        .bind(channel_id)
        .bind(user_id)
        .bind(join_time)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Close the latest open history row for the pair.
    pub async fn log_leave_event(
        &self,
        channel_id: &str,
        user_id: &str,
        leave_time: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE channel_member_history
            SET leave_time = ?
            WHERE rowid = (
                SELECT rowid FROM channel_member_history
                WHERE channel_id = ? AND user_id = ? AND leave_time IS NULL
                ORDER BY join_time DESC
                LIMIT 1
            )
            "#,
        )
        .bind(leave_time)
        .bind(channel_id)
        .bind(user_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Every membership-history row for a channel, oldest join first.
    pub async fn get_member_history(
        &self,
        channel_id: &str,
    ) -> Result<Vec<ChannelMemberHistory>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, i64, Option<i64>)>(
            r#"
            SELECT channel_id, user_id, join_time, leave_time
            FROM channel_member_history
            WHERE channel_id = ?
            ORDER BY join_time, user_id
            "#,
        )
        .bind(channel_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ChannelMemberHistory {
                channel_id: row.0,
                user_id: row.1,
                join_time: row.2,
                leave_time: row.3,
            })
            .collect())
    }
}
