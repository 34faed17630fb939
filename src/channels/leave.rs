//! Leaving, removal, archival and restoration.

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::model::{
    Channel, ChannelType, DEFAULT_CHANNEL_NAME, GroupSyncableType, Post, PostType, now_millis,
};
use crate::server::App;
use crate::ws::events::{EVENT_CHANNEL_DELETED, EVENT_CHANNEL_RESTORED, EVENT_USER_REMOVED};
use crate::ws::{Broadcast, WebSocketEvent};

impl App {
    /// A user walks out of a channel on their own. The last member of a
    /// private channel cannot; archive it instead.
    pub async fn leave_channel(&self, channel_id: &str, user_id: &str) -> AppResult<()> {
        // Channel, profile and member count load concurrently.
        let (tx_channel, rx_channel) = oneshot::channel();
        {
            let app = self.clone();
            let id = channel_id.to_string();
            self.go(async move {
                let _ = tx_channel.send(app.get_channel(&id).await);
            });
        }
        let (tx_user, rx_user) = oneshot::channel();
        {
            let app = self.clone();
            let id = user_id.to_string();
            self.go(async move {
                let _ = tx_user.send(app.get_user(&id).await);
            });
        }
        let (tx_count, rx_count) = oneshot::channel();
        {
            let app = self.clone();
            let id = channel_id.to_string();
            self.go(async move {
                let _ = tx_count
                    .send(app.store().channels().member_count(&id).await.map_err(AppError::from));
            });
        }

        let channel = super::recv_result(rx_channel).await?;
        let user = super::recv_result(rx_user).await?;
        let member_count = super::recv_result(rx_count).await?;

        if !channel.channel_type.is_team_scoped() {
            return Err(AppError::invalid_input(
                "app.channel.leave.direct.app_error",
                "direct and group conversations cannot be left",
            ));
        }
        if channel.channel_type == ChannelType::Private && member_count == 1 {
            return Err(AppError::invalid_input(
                "app.channel.leave.last_member.app_error",
                "the last member of a private channel cannot leave it",
            )
            .with_detail(format!("channel_id={channel_id}")));
        }

        self.remove_user_from_channel(user_id, user_id, &channel).await?;

        if channel.is_default(DEFAULT_CHANNEL_NAME)
            && !self.config().team.enable_default_channel_leave_join_messages
        {
            return Ok(());
        }

        // The leave message is decoration; it posts off the request path.
        let app = self.clone();
        self.go(async move {
            let mut post = Post::system(
                PostType::LeaveChannel,
                &user.id,
                &channel.id,
                &format!("{} has left the channel.", user.username),
            );
            post.add_prop("username", user.username.clone().into());
            app.post_message_best_effort(post).await;
        });

        Ok(())
    }

    /// Removes a user from a channel, recording the departure and telling
    /// both the channel and the removed user. Guests whose last channel
    /// on a team this was also lose the team membership.
    pub async fn remove_user_from_channel(
        &self,
        user_id_to_remove: &str,
        remover_user_id: &str,
        channel: &Channel,
    ) -> AppResult<()> {
        let user = self.get_user(user_id_to_remove).await?;

        if channel.group_constrained && user_id_to_remove != remover_user_id && !user.is_bot {
            let managed = self
                .store()
                .groups()
                .user_in_syncable_groups(user_id_to_remove, &channel.id, GroupSyncableType::Channel)
                .await?;
            if managed {
                return Err(AppError::forbidden(
                    "app.channel.remove_member.group_constrained.app_error",
                    "channel membership is managed by linked groups",
                ));
            }
        }

        let member = self.get_channel_member(&channel.id, user_id_to_remove).await?;
        self.store().channels().remove_member(&channel.id, user_id_to_remove).await?;
        if let Err(err) = self
            .store()
            .channels()
            .log_leave_event(&channel.id, user_id_to_remove, now_millis())
            .await
        {
            warn!(
                channel_id = %channel.id,
                user_id = user_id_to_remove,
                error = %err,
                "leave history write failed",
            );
        }
        self.invalidate_cache_for_user(user_id_to_remove).await;

        let actor = if remover_user_id == user_id_to_remove {
            None
        } else {
            Some(self.get_user(remover_user_id).await?)
        };
        {
            let app = self.clone();
            let left = member;
            self.go(async move {
                app.srv().plugins().user_has_left_channel(&left, actor.as_ref()).await;
            });
        }

        let event = WebSocketEvent::new(EVENT_USER_REMOVED, Broadcast::to_channel(&channel.id))
            .add("user_id", user_id_to_remove)
            .add("remover_id", remover_user_id);
        self.publish(event).await;

        // The removed user no longer matches the channel broadcast; they
        // get their own copy.
        let event = WebSocketEvent::new(EVENT_USER_REMOVED, Broadcast::to_user(user_id_to_remove))
            .add("channel_id", channel.id.as_str())
            .add("remover_id", remover_user_id);
        self.publish(event).await;

        if user.is_guest() && !channel.team_id.is_empty() {
            let remaining = self
                .store()
                .channels()
                .member_count_on_team(&channel.team_id, user_id_to_remove)
                .await?;
            if remaining == 0 {
                self.store()
                    .teams()
                    .remove_member(&channel.team_id, user_id_to_remove, now_millis())
                    .await?;
                info!(
                    team_id = %channel.team_id,
                    user_id = user_id_to_remove,
                    "guest left their last channel on the team",
                );
            }
        }

        Ok(())
    }

    /// Archives a channel: soft-deletes it and its webhooks, posts the
    /// archive notice, and tells the team. The default channel stays.
    pub async fn delete_channel(&self, channel_id: &str, user_id: &str) -> AppResult<()> {
        let channel = self.get_channel(channel_id).await?;

        // Webhook sets load concurrently with the remaining checks.
        let (tx_in, rx_in) = oneshot::channel();
        {
            let app = self.clone();
            let id = channel_id.to_string();
            self.go(async move {
                let _ = tx_in.send(
                    app.store().webhooks().get_incoming_by_channel(&id).await.map_err(AppError::from),
                );
            });
        }
        let (tx_out, rx_out) = oneshot::channel();
        {
            let app = self.clone();
            let id = channel_id.to_string();
            self.go(async move {
                let _ = tx_out.send(
                    app.store().webhooks().get_outgoing_by_channel(&id).await.map_err(AppError::from),
                );
            });
        }

        if channel.is_deleted() {
            return Err(AppError::invalid_input(
                "app.channel.delete_channel.deleted.app_error",
                "channel is already archived",
            ));
        }
        if channel.is_default(DEFAULT_CHANNEL_NAME) {
            return Err(AppError::invalid_input(
                "app.channel.delete_channel.cannot.app_error",
                "the default channel cannot be archived",
            )
            .with_detail(DEFAULT_CHANNEL_NAME));
        }

        let incoming = super::recv_result(rx_in).await?;
        let outgoing = super::recv_result(rx_out).await?;

        if !user_id.is_empty() {
            match self.get_user(user_id).await {
                Ok(user) => {
                    let mut post = Post::system(
                        PostType::ChannelDeleted,
                        user_id,
                        channel_id,
                        &format!("{} archived the channel.", user.username),
                    );
                    post.add_prop("username", user.username.clone().into());
                    self.post_message_best_effort(post).await;
                }
                Err(err) => warn!(user_id, error = %err, "archive notice author lookup failed"),
            }
        }

        let now = now_millis();
        for hook in &incoming {
            if let Err(err) = self.store().webhooks().delete_incoming(&hook.id, now).await {
                warn!(webhook_id = %hook.id, error = %err, "incoming webhook delete failed");
            }
        }
        for hook in &outgoing {
            if let Err(err) = self.store().webhooks().delete_outgoing(&hook.id, now).await {
                warn!(webhook_id = %hook.id, error = %err, "outgoing webhook delete failed");
            }
        }

        self.store().channels().set_delete_at(channel_id, now, now).await?;
        info!(channel_id, channel_name = %channel.name, "channel archived");

        let event = WebSocketEvent::new(EVENT_CHANNEL_DELETED, Broadcast::to_team(&channel.team_id))
            .add("channel_id", channel_id)
            .add("delete_at", now);
        self.publish(event).await;

        Ok(())
    }

    /// Brings an archived channel back.
    pub async fn restore_channel(&self, channel_id: &str, user_id: &str) -> AppResult<Channel> {
        let mut channel = self.get_channel(channel_id).await?;
        if !channel.is_deleted() {
            return Err(AppError::invalid_input(
                "app.channel.restore_channel.active.app_error",
                "channel is not archived",
            ));
        }

        let now = now_millis();
        self.store().channels().set_delete_at(channel_id, 0, now).await?;
        channel.delete_at = 0;
        channel.update_at = now;

        let event =
            WebSocketEvent::new(EVENT_CHANNEL_RESTORED, Broadcast::to_team(&channel.team_id))
                .add("channel_id", channel_id);
        self.publish(event).await;

        if !user_id.is_empty() {
            match self.get_user(user_id).await {
                Ok(user) => {
                    let mut post = Post::system(
                        PostType::ChannelRestored,
                        user_id,
                        channel_id,
                        &format!("{} unarchived the channel.", user.username),
                    );
                    post.add_prop("username", user.username.clone().into());
                    self.post_message_best_effort(post).await;
                }
                Err(err) => warn!(user_id, error = %err, "restore notice author lookup failed"),
            }
        }

        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::fixtures::{join_team, seeded_channel, seeded_team, seeded_user};
    use crate::model::{
        ChannelType, DEFAULT_CHANNEL_NAME, IncomingWebhook, OutgoingWebhook, PostType,
        SYSTEM_GUEST_ROLE_ID,
    };
    use crate::server::App;
    use crate::server::tests::test_server;
    use crate::store::StoreError;

    #[tokio::test]
    async fn leaving_removes_membership_and_closes_history() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let alice = seeded_user(&app, "alice").await;
        let bob = seeded_user(&app, "bob").await;
        join_team(&app, &team.id, &alice.id).await;
        join_team(&app, &team.id, &bob.id).await;
        app.add_user_to_channel(&alice, &channel, false, None).await.unwrap();
        app.add_user_to_channel(&bob, &channel, false, None).await.unwrap();

        app.leave_channel(&channel.id, &alice.id).await.unwrap();

        assert!(app.get_channel_member(&channel.id, &alice.id).await.is_err());
        let history = app.store().channels().get_member_history(&channel.id).await.unwrap();
        let alice_row = history.iter().find(|h| h.user_id == alice.id).unwrap();
        assert!(alice_row.leave_time.is_some());

        // The leave message posts asynchronously.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let posts = app.store().posts().get_for_channel(&channel.id, 10).await.unwrap();
            if posts.iter().any(|p| p.post_type == PostType::LeaveChannel) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "leave message never posted");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn last_member_of_a_private_channel_cannot_leave() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "secrets", ChannelType::Private).await;
        let alice = seeded_user(&app, "alice").await;
        join_team(&app, &team.id, &alice.id).await;
        app.add_user_to_channel(&alice, &channel, false, None).await.unwrap();

        let err = app.leave_channel(&channel.id, &alice.id).await.unwrap_err();
        assert_eq!(err.id(), "app.channel.leave.last_member.app_error");
        assert!(app.get_channel_member(&channel.id, &alice.id).await.is_ok());

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn direct_conversations_cannot_be_left() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let alice = seeded_user(&app, "alice").await;
        let bob = seeded_user(&app, "bob").await;
        let dm = app.get_or_create_direct_channel(&alice.id, &bob.id).await.unwrap();

        let err = app.leave_channel(&dm.id, &alice.id).await.unwrap_err();
        assert_eq!(err.id(), "app.channel.leave.direct.app_error");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn guest_removal_drops_the_team_membership_too() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let mut guest = seeded_user(&app, "visitor").await;
        guest.roles = SYSTEM_GUEST_ROLE_ID.to_string();
        app.store().users().update(&guest).await.unwrap();
        join_team(&app, &team.id, &guest.id).await;
        app.add_user_to_channel(&guest, &channel, false, None).await.unwrap();
        let remover = seeded_user(&app, "admin").await;

        app.remove_user_from_channel(&guest.id, &remover.id, &channel).await.unwrap();

        let err = app.store().teams().get_member(&team.id, &guest.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn archiving_soft_deletes_webhooks_and_posts_a_notice() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let alice = seeded_user(&app, "alice").await;

        let incoming = IncomingWebhook::new(&alice.id, &channel.id, &team.id);
        app.store().webhooks().save_incoming(&incoming).await.unwrap();
        let outgoing = OutgoingWebhook::new(&alice.id, &channel.id, &team.id);
        app.store().webhooks().save_outgoing(&outgoing).await.unwrap();

        app.delete_channel(&channel.id, &alice.id).await.unwrap();

        let archived = app.get_channel(&channel.id).await.unwrap();
        assert!(archived.is_deleted());
        assert!(app.store().webhooks().get_incoming_by_channel(&channel.id).await.unwrap().is_empty());
        assert!(app.store().webhooks().get_outgoing_by_channel(&channel.id).await.unwrap().is_empty());

        let posts = app.store().posts().get_for_channel(&channel.id, 10).await.unwrap();
        assert!(posts.iter().any(|p| p.post_type == PostType::ChannelDeleted));

        // A second archive attempt reports the state.
        let err = app.delete_channel(&channel.id, &alice.id).await.unwrap_err();
        assert_eq!(err.id(), "app.channel.delete_channel.deleted.app_error");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn the_default_channel_cannot_be_archived() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let town = seeded_channel(&app, &team.id, DEFAULT_CHANNEL_NAME, ChannelType::Open).await;

        let err = app.delete_channel(&town.id, "").await.unwrap_err();
        assert_eq!(err.id(), "app.channel.delete_channel.cannot.app_error");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn restore_reopens_an_archived_channel() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let alice = seeded_user(&app, "alice").await;

        let err = app.restore_channel(&channel.id, &alice.id).await.unwrap_err();
        assert_eq!(err.id(), "app.channel.restore_channel.active.app_error");

        app.delete_channel(&channel.id, &alice.id).await.unwrap();
        let restored = app.restore_channel(&channel.id, &alice.id).await.unwrap();
        assert_eq!(restored.delete_at, 0);
        assert!(!app.get_channel(&channel.id).await.unwrap().is_deleted());

        let posts = app.store().posts().get_for_channel(&channel.id, 10).await.unwrap();
        assert!(posts.iter().any(|p| p.post_type == PostType::ChannelRestored));

        srv.shutdown().await;
    }
}
