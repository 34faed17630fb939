//! Joining channels and moving read cursors.

use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};
use crate::model::{
    Channel, ChannelMember, ChannelType, ChannelUnread, DEFAULT_CHANNEL_NAME,
    GroupSyncableType, OFF_TOPIC_CHANNEL_NAME, Post, PostType, User, now_millis,
};
use crate::push::{PUSH_TYPE_CLEAR, PushNotification};
use crate::server::App;
use crate::store::StoreError;
use crate::ws::events::{EVENT_CHANNEL_VIEWED, EVENT_POST_UNREAD, EVENT_USER_ADDED};
use crate::ws::{Broadcast, WebSocketEvent};

impl App {
    /// Puts a user into a team channel. The user must already be on the
    /// channel's team; group-constrained channels only take users the
    /// linked groups put there.
    pub async fn add_user_to_channel(
        &self,
        user: &User,
        channel: &Channel,
        as_admin: bool,
        actor: Option<&User>,
    ) -> AppResult<ChannelMember> {
        if channel.is_deleted() {
            return Err(AppError::invalid_input(
                "app.channel.add_user.deleted.app_error",
                "cannot add a user to an archived channel",
            ));
        }
        if !channel.channel_type.is_team_scoped() {
            return Err(AppError::invalid_input(
                "app.channel.add_user.wrong_type.app_error",
                "direct and group channels have fixed membership",
            ));
        }
        match self.store().teams().get_member(&channel.team_id, &user.id).await {
            Ok(_) => {}
            Err(StoreError::NotFound { .. }) => {
                return Err(AppError::forbidden(
                    "app.channel.add_user.missing_team_member.app_error",
                    "user is not a member of the channel's team",
                ));
            }
            Err(err) => return Err(err.into()),
        }
        if channel.group_constrained
            && !self
                .store()
                .groups()
                .user_in_syncable_groups(&user.id, &channel.id, GroupSyncableType::Channel)
                .await?
        {
            return Err(AppError::forbidden(
                "app.channel.add_user.group_constrained.app_error",
                "channel membership is managed by linked groups",
            ));
        }

        let member = self.save_member_with_history(channel, user, as_admin).await?;
        self.invalidate_cache_for_user(&user.id).await;

        {
            let app = self.clone();
            let joined = member.clone();
            let actor = actor.cloned();
            self.go(async move {
                app.srv().plugins().user_has_joined_channel(&joined, actor.as_ref()).await;
            });
        }

        let event = WebSocketEvent::new(EVENT_USER_ADDED, Broadcast::to_channel(&channel.id))
            .add("user_id", user.id.as_str())
            .add("team_id", channel.team_id.as_str());
        self.publish(event).await;

        Ok(member)
    }

    /// Joins a new team member into the team's landing channels: the
    /// default channel always, plus either the stock off-topic channel or
    /// the configured replacement list. Names that do not resolve to an
    /// open channel are skipped.
    pub async fn join_default_channels(
        &self,
        team_id: &str,
        user: &User,
        as_admin: bool,
        requestor_id: &str,
    ) -> AppResult<()> {
        let cfg = self.config();
        let mut names: Vec<String> = vec![DEFAULT_CHANNEL_NAME.to_string()];
        if cfg.team.experimental_default_channels.is_empty() {
            names.push(OFF_TOPIC_CHANNEL_NAME.to_string());
        } else {
            for name in &cfg.team.experimental_default_channels {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }

        let requestor = if requestor_id.is_empty() || requestor_id == user.id {
            None
        } else {
            Some(self.get_user(requestor_id).await?)
        };

        for name in &names {
            let channel = match self.store().channels().get_by_name(team_id, name, false).await {
                Ok(channel) => channel,
                Err(StoreError::NotFound { .. }) => continue,
                Err(err) => return Err(err.into()),
            };
            if channel.channel_type != ChannelType::Open {
                continue;
            }

            let member = self.save_member_with_history(&channel, user, as_admin).await?;

            let suppress = channel.is_default(DEFAULT_CHANNEL_NAME)
                && !cfg.team.enable_default_channel_leave_join_messages;
            if !suppress {
                self.post_message_best_effort(join_message(&channel, user, requestor.as_ref()))
                    .await;
            }

            {
                let app = self.clone();
                let joined = member;
                let actor = requestor.clone();
                self.go(async move {
                    app.srv().plugins().user_has_joined_channel(&joined, actor.as_ref()).await;
                });
            }

            let event = WebSocketEvent::new(EVENT_USER_ADDED, Broadcast::to_channel(&channel.id))
                .add("user_id", user.id.as_str())
                .add("team_id", channel.team_id.as_str());
            self.publish(event).await;
        }

        self.invalidate_cache_for_user(&user.id).await;
        Ok(())
    }

    /// Marks a channel read (and the one being navigated away from),
    /// returning the new view timestamps keyed by channel id. Viewing
    /// also feeds the auto-away machinery the user's active channel.
    pub async fn view_channel(
        &self,
        user_id: &str,
        channel_id: &str,
        prev_channel_id: &str,
    ) -> AppResult<BTreeMap<String, i64>> {
        let mut channel_ids = Vec::with_capacity(2);
        if !channel_id.is_empty() {
            channel_ids.push(channel_id.to_string());
        }
        if !prev_channel_id.is_empty() && prev_channel_id != channel_id {
            channel_ids.push(prev_channel_id.to_string());
        }
        if channel_ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let times = self
            .store()
            .channels()
            .update_last_viewed_at(&channel_ids, user_id, now_millis())
            .await?;

        self.set_active_channel(user_id, channel_id).await;

        if !channel_id.is_empty() {
            // Viewing clears any mobile badge the channel had accumulated.
            let mut clear = PushNotification::new(user_id, PUSH_TYPE_CLEAR, "");
            clear.channel_id = channel_id.to_string();
            self.srv().push().send(clear);

            let event = WebSocketEvent::new(EVENT_CHANNEL_VIEWED, Broadcast::to_user(user_id))
                .add("channel_id", channel_id);
            self.publish(event).await;
        }

        Ok(times)
    }

    /// Rewinds a member's read cursor to just before a post, so that post
    /// and everything after it count as unread again.
    pub async fn mark_channel_as_unread_from_post(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> AppResult<ChannelUnread> {
        let post = match self.store().posts().get(post_id).await {
            Ok(post) => post,
            Err(StoreError::NotFound { .. }) => {
                return Err(AppError::not_found(
                    "app.post.get.missing.app_error",
                    "post not found",
                )
                .with_detail(format!("post_id={post_id}")));
            }
            Err(err) => return Err(err.into()),
        };

        let mut member = self.get_channel_member(&post.channel_id, user_id).await?;
        let read_count = self
            .store()
            .posts()
            .count_before(&post.channel_id, post.create_at)
            .await?;

        member.last_viewed_at = post.create_at - 1;
        member.msg_count = read_count;
        member.last_update_at = now_millis();
        self.store().channels().update_member(&member).await?;

        let unread = self.store().channels().get_unread(&post.channel_id, user_id).await?;

        let event = WebSocketEvent::new(EVENT_POST_UNREAD, Broadcast::to_user(user_id))
            .add("channel_id", unread.channel_id.as_str())
            .add("post_id", post_id)
            .add("msg_count", unread.msg_count)
            .add("mention_count", unread.mention_count);
        self.publish(event).await;

        Ok(unread)
    }
}

fn join_message(channel: &Channel, user: &User, requestor: Option<&User>) -> Post {
    match requestor {
        None => {
            let mut post = Post::system(
                PostType::JoinChannel,
                &user.id,
                &channel.id,
                &format!("{} joined the channel.", user.username),
            );
            post.add_prop("username", user.username.clone().into());
            post
        }
        Some(requestor) => {
            let mut post = Post::system(
                PostType::AddToChannel,
                &requestor.id,
                &channel.id,
                &format!(
                    "{} added to the channel by {}.",
                    user.username, requestor.username
                ),
            );
            post.add_prop("userId", requestor.id.clone().into());
            post.add_prop("username", requestor.username.clone().into());
            post.add_prop("addedUserId", user.id.clone().into());
            post.add_prop("addedUsername", user.username.clone().into());
            post
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{join_team, seeded_channel, seeded_team, seeded_user};
    use crate::model::{ChannelType, DEFAULT_CHANNEL_NAME, Post, PostType};
    use crate::server::App;
    use crate::server::tests::{test_config, test_server};

    #[tokio::test]
    async fn add_user_requires_team_membership() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let user = seeded_user(&app, "alice").await;

        let err = app.add_user_to_channel(&user, &channel, false, None).await.unwrap_err();
        assert_eq!(err.id(), "app.channel.add_user.missing_team_member.app_error");

        join_team(&app, &team.id, &user.id).await;
        let member = app.add_user_to_channel(&user, &channel, false, None).await.unwrap();
        assert!(member.scheme_user);
        assert!(!member.scheme_admin);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn add_user_to_archived_channel_is_rejected() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let mut channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let user = seeded_user(&app, "alice").await;
        join_team(&app, &team.id, &user.id).await;
        channel.delete_at = 1;

        let err = app.add_user_to_channel(&user, &channel, false, None).await.unwrap_err();
        assert_eq!(err.id(), "app.channel.add_user.deleted.app_error");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn joining_twice_returns_the_existing_membership() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let user = seeded_user(&app, "alice").await;
        join_team(&app, &team.id, &user.id).await;

        app.add_user_to_channel(&user, &channel, false, None).await.unwrap();
        app.add_user_to_channel(&user, &channel, false, None).await.unwrap();

        let history = app.store().channels().get_member_history(&channel.id).await.unwrap();
        assert_eq!(history.len(), 1);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn default_channels_cover_town_square_and_off_topic() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let town = seeded_channel(&app, &team.id, DEFAULT_CHANNEL_NAME, ChannelType::Open).await;
        let off_topic = seeded_channel(&app, &team.id, "off-topic", ChannelType::Open).await;
        let user = seeded_user(&app, "alice").await;
        join_team(&app, &team.id, &user.id).await;

        app.join_default_channels(&team.id, &user, false, "").await.unwrap();

        assert!(app.get_channel_member(&town.id, &user.id).await.is_ok());
        assert!(app.get_channel_member(&off_topic.id, &user.id).await.is_ok());

        let posts = app.store().posts().get_for_channel(&town.id, 10).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].post_type, PostType::JoinChannel);
        assert_eq!(posts[0].message, "alice joined the channel.");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn experimental_list_replaces_off_topic() {
        let srv = test_server().await;
        let mut cfg = test_config();
        cfg.team.experimental_default_channels = vec!["dev".to_string(), "missing".to_string()];
        srv.config().set(cfg);
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let town = seeded_channel(&app, &team.id, DEFAULT_CHANNEL_NAME, ChannelType::Open).await;
        let off_topic = seeded_channel(&app, &team.id, "off-topic", ChannelType::Open).await;
        let dev = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let user = seeded_user(&app, "alice").await;
        join_team(&app, &team.id, &user.id).await;

        app.join_default_channels(&team.id, &user, false, "").await.unwrap();

        assert!(app.get_channel_member(&town.id, &user.id).await.is_ok());
        assert!(app.get_channel_member(&dev.id, &user.id).await.is_ok());
        assert!(app.get_channel_member(&off_topic.id, &user.id).await.is_err());

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn private_default_channels_are_skipped() {
        let srv = test_server().await;
        let mut cfg = test_config();
        cfg.team.experimental_default_channels = vec!["secrets".to_string()];
        srv.config().set(cfg);
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        seeded_channel(&app, &team.id, DEFAULT_CHANNEL_NAME, ChannelType::Open).await;
        let secrets = seeded_channel(&app, &team.id, "secrets", ChannelType::Private).await;
        let user = seeded_user(&app, "alice").await;
        join_team(&app, &team.id, &user.id).await;

        app.join_default_channels(&team.id, &user, false, "").await.unwrap();
        assert!(app.get_channel_member(&secrets.id, &user.id).await.is_err());

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn added_by_requestor_posts_an_add_message() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let town = seeded_channel(&app, &team.id, DEFAULT_CHANNEL_NAME, ChannelType::Open).await;
        let admin = seeded_user(&app, "admin").await;
        let user = seeded_user(&app, "alice").await;
        join_team(&app, &team.id, &user.id).await;

        app.join_default_channels(&team.id, &user, false, &admin.id).await.unwrap();

        let posts = app.store().posts().get_for_channel(&town.id, 10).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].post_type, PostType::AddToChannel);
        assert_eq!(posts[0].user_id, admin.id);
        assert_eq!(posts[0].message, "alice added to the channel by admin.");
        assert_eq!(posts[0].props.get("addedUsername").and_then(|v| v.as_str()), Some("alice"));

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn view_channel_clears_the_unread_cursor() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let user = seeded_user(&app, "alice").await;
        let poster = seeded_user(&app, "bob").await;
        join_team(&app, &team.id, &user.id).await;
        app.add_user_to_channel(&user, &channel, false, None).await.unwrap();

        for i in 0..3 {
            app.create_post(Post::new(&poster.id, &channel.id, &format!("msg {i}")))
                .await
                .unwrap();
        }
        let unread = app.store().channels().get_unread(&channel.id, &user.id).await.unwrap();
        assert_eq!(unread.msg_count, 3);

        let times = app.view_channel(&user.id, &channel.id, "").await.unwrap();
        assert!(times.get(&channel.id).copied().unwrap_or(0) > 0);

        let unread = app.store().channels().get_unread(&channel.id, &user.id).await.unwrap();
        assert_eq!(unread.msg_count, 0);
        assert_eq!(unread.mention_count, 0);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn mark_unread_rewinds_to_the_given_post() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let user = seeded_user(&app, "alice").await;
        let poster = seeded_user(&app, "bob").await;
        join_team(&app, &team.id, &user.id).await;
        app.add_user_to_channel(&user, &channel, false, None).await.unwrap();

        let mut posts = Vec::new();
        for i in 0..3 {
            posts.push(
                app.create_post(Post::new(&poster.id, &channel.id, &format!("msg {i}")))
                    .await
                    .unwrap(),
            );
            // Distinct create_at values keep the cursor math unambiguous.
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        app.view_channel(&user.id, &channel.id, "").await.unwrap();

        let unread = app
            .mark_channel_as_unread_from_post(&posts[1].id, &user.id)
            .await
            .unwrap();
        assert_eq!(unread.msg_count, 2);

        let member = app.get_channel_member(&channel.id, &user.id).await.unwrap();
        assert_eq!(member.last_viewed_at, posts[1].create_at - 1);

        srv.shutdown().await;
    }
}
