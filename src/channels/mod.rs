//! Channel membership and lifecycle.
//!
//! Everything here is an [`App`] operation: creating channels of the
//! four types, moving users in and out, read cursors, archival, and the
//! per-user sidebar. Direct and group channels are unowned by any team;
//! their canonical names make creation races converge on one row.
//!
//! Membership writes and their history rows belong to the same logical
//! operation: a join that cannot be recorded fails, while the system
//! messages, cache drops and webhook rewrites around it only warn.

mod create;
mod join;
mod leave;
mod manage;
mod sidebar;

use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::model::{Channel, ChannelMember, Post, User, now_millis};
use crate::server::App;
use crate::store::StoreError;

impl App {
    pub async fn get_channel(&self, channel_id: &str) -> AppResult<Channel> {
        self.store()
            .channels()
            .get(channel_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound { .. } => {
                    AppError::not_found("app.channel.get.missing.app_error", "channel not found")
                        .with_detail(format!("channel_id={channel_id}"))
                }
                other => other.into(),
            })
    }

    pub async fn get_channel_member(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> AppResult<ChannelMember> {
        self.store()
            .channels()
            .get_member(channel_id, user_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound { .. } => AppError::not_found(
                    "app.channel.get_member.missing.app_error",
                    "user is not a member of this channel",
                )
                .with_detail(format!("channel_id={channel_id} user_id={user_id}")),
                other => other.into(),
            })
    }

    /// Writes the member row and its join-history row as one logical
    /// operation. A conflict means a concurrent join already won; the
    /// existing row is returned and no second history entry is written.
    async fn save_member_with_history(
        &self,
        channel: &Channel,
        user: &User,
        as_admin: bool,
    ) -> AppResult<ChannelMember> {
        let mut member = ChannelMember::new(&channel.id, &user.id);
        if user.is_guest() {
            member.scheme_guest = true;
        } else {
            member.scheme_user = true;
            member.scheme_admin = as_admin;
        }

        match self.store().channels().save_member(&member).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                return self.get_channel_member(&channel.id, &user.id).await;
            }
            Err(err) => return Err(err.into()),
        }

        self.store()
            .channels()
            .log_join_event(&channel.id, &user.id, now_millis())
            .await?;
        Ok(member)
    }

    /// System messages around the channel lifecycle never fail their
    /// triggering operation.
    async fn post_message_best_effort(&self, post: Post) {
        let channel_id = post.channel_id.clone();
        if let Err(err) = self.create_post(post).await {
            warn!(channel_id = %channel_id, error = %err, "system message post failed");
        }
    }
}

/// Collects a result from a task spawned onto the tracked pool. The
/// sender being dropped without a value means the task itself died.
async fn recv_result<T>(rx: oneshot::Receiver<AppResult<T>>) -> AppResult<T> {
    rx.await.map_err(|_| {
        AppError::internal(
            "app.channel.background_load.app_error",
            "background load dropped its result",
        )
    })?
}

#[cfg(test)]
mod fixtures {
    use crate::model::{Channel, ChannelType, Team, TeamMember, User};
    use crate::server::App;

    pub(super) async fn seeded_user(app: &App, username: &str) -> User {
        let mut user = User::new(username, &format!("{username}@example.com"));
        user.pre_save();
        app.store().users().save(&user).await.unwrap();
        user
    }

    pub(super) async fn seeded_team(app: &App, name: &str) -> Team {
        let team = Team::new(name, name);
        app.store().teams().save(&team).await.unwrap();
        team
    }

    pub(super) async fn join_team(app: &App, team_id: &str, user_id: &str) {
        app.store()
            .teams()
            .save_member(&TeamMember::new(team_id, user_id))
            .await
            .unwrap();
    }

    pub(super) async fn seeded_channel(
        app: &App,
        team_id: &str,
        name: &str,
        channel_type: ChannelType,
    ) -> Channel {
        let mut channel = Channel::new(team_id, channel_type, name, name);
        channel.pre_save();
        app.store().channels().save(&channel).await.unwrap();
        channel
    }
}
