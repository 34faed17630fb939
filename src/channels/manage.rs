//! Channel metadata, privacy, schemes, member roles, and team moves.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::model::{
    Channel, ChannelMember, ChannelType, DEFAULT_CHANNEL_NAME, Post, PostType, SchemeScope,
    now_millis,
};
use crate::server::App;
use crate::store::StoreError;
use crate::ws::events::{
    EVENT_CHANNEL_CONVERTED, EVENT_CHANNEL_MEMBER_UPDATED, EVENT_CHANNEL_SCHEME_UPDATED,
    EVENT_CHANNEL_UPDATED, EVENT_MEMBERROLE_UPDATED,
};
use crate::ws::{Broadcast, WebSocketEvent};

impl App {
    /// Writes back an edited channel. Changes to the header, purpose or
    /// display name announce themselves in the channel when an editor is
    /// named; the edit itself never depends on those messages landing.
    pub async fn update_channel(&self, mut channel: Channel, updated_by: &str) -> AppResult<Channel> {
        let old = self.get_channel(&channel.id).await?;

        channel.pre_update();
        channel.is_valid()?;
        match self.store().channels().update(&channel).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                return Err(AppError::conflict(
                    "app.channel.update_channel.exists.app_error",
                    "a channel with that name already exists on this team",
                )
                .with_detail(format!("name={}", channel.name)));
            }
            Err(StoreError::NotFound { .. }) => {
                return Err(AppError::not_found(
                    "app.channel.get.missing.app_error",
                    "channel not found",
                ));
            }
            Err(err) => return Err(err.into()),
        }

        if !updated_by.is_empty() {
            match self.get_user(updated_by).await {
                Ok(editor) => {
                    for post in field_change_messages(&old, &channel, &editor.username, &editor.id) {
                        self.post_message_best_effort(post).await;
                    }
                }
                Err(err) => warn!(user_id = updated_by, error = %err, "editor lookup failed"),
            }
        }

        let payload = serde_json::to_value(&channel).map_err(|err| {
            AppError::internal(
                "app.channel.update_channel.encode.app_error",
                "channel could not be encoded",
            )
            .with_detail(err.to_string())
        })?;
        let event = WebSocketEvent::new(EVENT_CHANNEL_UPDATED, Broadcast::to_channel(&channel.id))
            .add("channel", payload);
        self.publish(event).await;

        Ok(channel)
    }

    /// Flips a channel between open and private. The default channel is
    /// pinned open.
    pub async fn update_channel_privacy(
        &self,
        channel_id: &str,
        channel_type: ChannelType,
        user_id: &str,
    ) -> AppResult<Channel> {
        if !channel_type.is_team_scoped() {
            return Err(AppError::invalid_input(
                "app.channel.update_privacy.type.app_error",
                "privacy only toggles between open and private",
            ));
        }
        let mut channel = self.get_channel(channel_id).await?;
        if !channel.channel_type.is_team_scoped() {
            return Err(AppError::invalid_input(
                "app.channel.update_privacy.type.app_error",
                "direct and group channels have no privacy setting",
            ));
        }
        if channel.is_default(DEFAULT_CHANNEL_NAME) && channel_type == ChannelType::Private {
            return Err(AppError::invalid_input(
                "app.channel.update_privacy.default_channel.app_error",
                "the default channel cannot be made private",
            ));
        }
        if channel.channel_type == channel_type {
            return Ok(channel);
        }

        channel.channel_type = channel_type;
        channel.pre_update();
        self.store().channels().update(&channel).await?;
        info!(channel_id, channel_type = channel_type.as_str(), "channel privacy changed");

        if !user_id.is_empty() {
            match self.get_user(user_id).await {
                Ok(user) => {
                    let message = match channel_type {
                        ChannelType::Private => {
                            "This channel has been converted to a private channel."
                        }
                        _ => {
                            "This channel has been converted to a public channel and can be joined by any team member."
                        }
                    };
                    let mut post =
                        Post::system(PostType::ConvertChannel, user_id, channel_id, message);
                    post.add_prop("username", user.username.clone().into());
                    self.post_message_best_effort(post).await;
                }
                Err(err) => warn!(user_id, error = %err, "convert notice author lookup failed"),
            }
        }

        let event =
            WebSocketEvent::new(EVENT_CHANNEL_CONVERTED, Broadcast::to_team(&channel.team_id))
                .add("channel_id", channel_id);
        self.publish(event).await;

        Ok(channel)
    }

    /// Attaches (or detaches) a permission scheme. Only channel-scoped
    /// schemes fit.
    pub async fn update_channel_scheme(
        &self,
        channel_id: &str,
        scheme_id: Option<String>,
    ) -> AppResult<Channel> {
        if let Some(id) = &scheme_id {
            let scheme = self.store().schemes().get(id).await.map_err(|err| match err {
                StoreError::NotFound { .. } => AppError::not_found(
                    "app.scheme.get.missing.app_error",
                    "scheme not found",
                )
                .with_detail(format!("scheme_id={id}")),
                other => other.into(),
            })?;
            if scheme.scope != SchemeScope::Channel {
                return Err(AppError::invalid_input(
                    "app.channel.update_scheme.scope.app_error",
                    "scheme is not channel-scoped",
                ));
            }
        }

        let mut channel = self.get_channel(channel_id).await?;
        channel.scheme_id = scheme_id;
        channel.pre_update();
        self.store().channels().update(&channel).await?;

        let event = WebSocketEvent::new(
            EVENT_CHANNEL_SCHEME_UPDATED,
            Broadcast::to_channel(channel_id),
        )
        .add("channel_id", channel_id);
        self.publish(event).await;

        Ok(channel)
    }

    /// Rewrites a member's scheme roles. Guests stay guests; they cannot
    /// be promoted to channel admin.
    pub async fn update_channel_member_roles(
        &self,
        channel_id: &str,
        user_id: &str,
        scheme_user: bool,
        scheme_admin: bool,
    ) -> AppResult<ChannelMember> {
        let mut member = self.get_channel_member(channel_id, user_id).await?;
        if member.scheme_guest && scheme_admin {
            return Err(AppError::invalid_input(
                "app.channel.update_member_roles.guest_and_admin.app_error",
                "a guest cannot be a channel admin",
            ));
        }

        member.scheme_user = scheme_user;
        member.scheme_admin = scheme_admin;
        member.last_update_at = now_millis();
        self.store().channels().update_member(&member).await?;
        self.invalidate_cache_for_user(user_id).await;

        let event = WebSocketEvent::new(EVENT_MEMBERROLE_UPDATED, Broadcast::to_user(user_id))
            .add("member", json!(member));
        self.publish(event).await;

        Ok(member)
    }

    /// Merges notification overrides into a membership.
    pub async fn update_channel_member_notify_props(
        &self,
        channel_id: &str,
        user_id: &str,
        props: BTreeMap<String, String>,
    ) -> AppResult<ChannelMember> {
        let mut member = self.get_channel_member(channel_id, user_id).await?;
        for (key, value) in props {
            member.notify_props.insert(key, value);
        }
        member.last_update_at = now_millis();
        self.store().channels().update_member(&member).await?;
        self.invalidate_cache_for_user(user_id).await;

        let event =
            WebSocketEvent::new(EVENT_CHANNEL_MEMBER_UPDATED, Broadcast::to_user(user_id))
                .add("channel_member", json!(member));
        self.publish(event).await;

        Ok(member)
    }

    /// Rehomes a channel onto another team. Every member must already be
    /// on the destination team; whatever slips through between the check
    /// and the move is swept out afterwards. Webhooks follow the channel,
    /// sidebar entries on the old team do not.
    pub async fn move_channel(
        &self,
        channel_id: &str,
        team_id: &str,
        user_id: &str,
    ) -> AppResult<Channel> {
        let mut channel = self.get_channel(channel_id).await?;
        if !channel.channel_type.is_team_scoped() {
            return Err(AppError::invalid_input(
                "app.channel.move_channel.type.app_error",
                "direct and group channels do not belong to a team",
            ));
        }
        if channel.team_id == team_id {
            return Ok(channel);
        }
        self.store().teams().get(team_id).await.map_err(|err| match err {
            StoreError::NotFound { .. } => {
                AppError::not_found("app.team.get.missing.app_error", "team not found")
                    .with_detail(format!("team_id={team_id}"))
            }
            other => other.into(),
        })?;
        let previous_team_name = self
            .store()
            .teams()
            .get(&channel.team_id)
            .await
            .map(|team| team.display_name)
            .unwrap_or_else(|_| channel.team_id.clone());

        let members = self.store().channels().get_members(channel_id).await?;
        for member in &members {
            match self.store().teams().get_member(team_id, &member.user_id).await {
                Ok(_) => {}
                Err(StoreError::NotFound { .. }) => {
                    return Err(AppError::invalid_input(
                        "app.channel.move_channel.members_do_not_match.app_error",
                        "all channel members must belong to the destination team",
                    )
                    .with_detail(format!("user_id={}", member.user_id)));
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Old-team sidebars would otherwise keep pointing at the channel.
        for member in &members {
            if let Err(err) = self
                .store()
                .sidebar()
                .remove_channel_for_user(&member.user_id, channel_id)
                .await
            {
                warn!(user_id = %member.user_id, error = %err, "sidebar cleanup failed");
            }
        }

        let now = now_millis();
        self.store().channels().update_team_id(channel_id, team_id, now).await?;
        channel.team_id = team_id.to_string();
        channel.update_at = now;
        info!(channel_id, team_id, "channel moved");

        if let Err(err) = self
            .store()
            .webhooks()
            .update_team_for_channel(channel_id, team_id, now)
            .await
        {
            warn!(channel_id, error = %err, "webhook team migration failed");
        }

        // Memberships can change between the check and the move; sweep out
        // anyone not on the destination team anymore.
        let members = self.store().channels().get_members(channel_id).await?;
        for member in &members {
            if let Err(StoreError::NotFound { .. }) =
                self.store().teams().get_member(team_id, &member.user_id).await
            {
                if let Err(err) = self
                    .remove_user_from_channel(&member.user_id, user_id, &channel)
                    .await
                {
                    warn!(user_id = %member.user_id, error = %err, "post-move member sweep failed");
                }
            }
        }

        if !user_id.is_empty() {
            match self.get_user(user_id).await {
                Ok(user) => {
                    let mut post = Post::system(
                        PostType::MoveChannel,
                        user_id,
                        channel_id,
                        &format!("This channel has been moved to this team from {previous_team_name}."),
                    );
                    post.add_prop("username", user.username.clone().into());
                    self.post_message_best_effort(post).await;
                }
                Err(err) => warn!(user_id, error = %err, "move notice author lookup failed"),
            }
        }

        Ok(channel)
    }
}

/// One system message per announced field change. Unchanged fields stay
/// quiet.
fn field_change_messages(old: &Channel, new: &Channel, username: &str, user_id: &str) -> Vec<Post> {
    let mut posts = Vec::new();

    if old.header != new.header {
        let message = if old.header.is_empty() {
            format!("{username} updated the channel header to: {}", new.header)
        } else if new.header.is_empty() {
            format!("{username} removed the channel header (was: {})", old.header)
        } else {
            format!(
                "{username} updated the channel header from: {} to: {}",
                old.header, new.header
            )
        };
        let mut post = Post::system(PostType::HeaderChange, user_id, &new.id, &message);
        post.add_prop("username", username.into());
        post.add_prop("old_header", old.header.clone().into());
        post.add_prop("new_header", new.header.clone().into());
        posts.push(post);
    }

    if old.purpose != new.purpose {
        let message = if old.purpose.is_empty() {
            format!("{username} updated the channel purpose to: {}", new.purpose)
        } else if new.purpose.is_empty() {
            format!("{username} removed the channel purpose (was: {})", old.purpose)
        } else {
            format!(
                "{username} updated the channel purpose from: {} to: {}",
                old.purpose, new.purpose
            )
        };
        let mut post = Post::system(PostType::PurposeChange, user_id, &new.id, &message);
        post.add_prop("username", username.into());
        post.add_prop("old_purpose", old.purpose.clone().into());
        post.add_prop("new_purpose", new.purpose.clone().into());
        posts.push(post);
    }

    if old.display_name != new.display_name {
        let message = format!(
            "{username} updated the channel display name from: {} to: {}",
            old.display_name, new.display_name
        );
        let mut post = Post::system(PostType::DisplayNameChange, user_id, &new.id, &message);
        post.add_prop("username", username.into());
        post.add_prop("old_displayname", old.display_name.clone().into());
        post.add_prop("new_displayname", new.display_name.clone().into());
        posts.push(post);
    }

    posts
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::super::fixtures::{join_team, seeded_channel, seeded_team, seeded_user};
    use crate::model::{ChannelType, DEFAULT_CHANNEL_NAME, PostType, Scheme, SchemeScope};
    use crate::server::App;
    use crate::server::tests::test_server;

    #[tokio::test]
    async fn field_edits_announce_themselves() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let editor = seeded_user(&app, "alice").await;

        let mut edited = channel.clone();
        edited.header = "release schedule".to_string();
        edited.display_name = "Dev Team".to_string();
        let updated = app.update_channel(edited, &editor.id).await.unwrap();
        assert_eq!(updated.header, "release schedule");

        let posts = app.store().posts().get_for_channel(&channel.id, 10).await.unwrap();
        assert!(posts.iter().any(|p| p.post_type == PostType::HeaderChange
            && p.message == "alice updated the channel header to: release schedule"));
        assert!(posts.iter().any(|p| p.post_type == PostType::DisplayNameChange));
        assert!(!posts.iter().any(|p| p.post_type == PostType::PurposeChange));

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn renaming_onto_an_existing_name_conflicts() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let other = seeded_channel(&app, &team.id, "ops", ChannelType::Open).await;

        let mut renamed = other.clone();
        renamed.name = "dev".to_string();
        let err = app.update_channel(renamed, "").await.unwrap_err();
        assert_eq!(err.id(), "app.channel.update_channel.exists.app_error");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn privacy_toggle_converts_and_posts() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let alice = seeded_user(&app, "alice").await;

        let converted = app
            .update_channel_privacy(&channel.id, ChannelType::Private, &alice.id)
            .await
            .unwrap();
        assert_eq!(converted.channel_type, ChannelType::Private);

        let posts = app.store().posts().get_for_channel(&channel.id, 10).await.unwrap();
        assert!(posts.iter().any(|p| p.post_type == PostType::ConvertChannel
            && p.message == "This channel has been converted to a private channel."));

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn default_channel_stays_open() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let town = seeded_channel(&app, &team.id, DEFAULT_CHANNEL_NAME, ChannelType::Open).await;

        let err = app
            .update_channel_privacy(&town.id, ChannelType::Private, "")
            .await
            .unwrap_err();
        assert_eq!(err.id(), "app.channel.update_privacy.default_channel.app_error");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn scheme_attachment_checks_the_scope() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;

        let team_scheme = Scheme::new("team scheme", SchemeScope::Team);
        app.store().schemes().save(&team_scheme).await.unwrap();
        let err = app
            .update_channel_scheme(&channel.id, Some(team_scheme.id.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.id(), "app.channel.update_scheme.scope.app_error");

        let channel_scheme = Scheme::new("channel scheme", SchemeScope::Channel);
        app.store().schemes().save(&channel_scheme).await.unwrap();
        let updated = app
            .update_channel_scheme(&channel.id, Some(channel_scheme.id.clone()))
            .await
            .unwrap();
        assert_eq!(updated.scheme_id.as_deref(), Some(channel_scheme.id.as_str()));

        let cleared = app.update_channel_scheme(&channel.id, None).await.unwrap();
        assert!(cleared.scheme_id.is_none());

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn guests_cannot_become_channel_admins() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let mut guest = seeded_user(&app, "visitor").await;
        guest.roles = crate::model::SYSTEM_GUEST_ROLE_ID.to_string();
        app.store().users().update(&guest).await.unwrap();
        join_team(&app, &team.id, &guest.id).await;
        app.add_user_to_channel(&guest, &channel, false, None).await.unwrap();

        let err = app
            .update_channel_member_roles(&channel.id, &guest.id, false, true)
            .await
            .unwrap_err();
        assert_eq!(err.id(), "app.channel.update_member_roles.guest_and_admin.app_error");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn notify_props_merge_without_clobbering() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let channel = seeded_channel(&app, &team.id, "dev", ChannelType::Open).await;
        let alice = seeded_user(&app, "alice").await;
        join_team(&app, &team.id, &alice.id).await;
        app.add_user_to_channel(&alice, &channel, false, None).await.unwrap();

        let mut props = BTreeMap::new();
        props.insert("desktop".to_string(), "all".to_string());
        let member = app
            .update_channel_member_notify_props(&channel.id, &alice.id, props)
            .await
            .unwrap();

        assert_eq!(member.notify_props.get("desktop").map(String::as_str), Some("all"));
        // Untouched defaults survive the merge.
        assert_eq!(member.notify_props.get("mark_unread").map(String::as_str), Some("all"));

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn moving_requires_destination_team_membership() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let source = seeded_team(&app, "acme").await;
        let destination = seeded_team(&app, "globex").await;
        let channel = seeded_channel(&app, &source.id, "dev", ChannelType::Open).await;
        let alice = seeded_user(&app, "alice").await;
        join_team(&app, &source.id, &alice.id).await;
        app.add_user_to_channel(&alice, &channel, false, None).await.unwrap();

        let err = app.move_channel(&channel.id, &destination.id, "").await.unwrap_err();
        assert_eq!(err.id(), "app.channel.move_channel.members_do_not_match.app_error");

        join_team(&app, &destination.id, &alice.id).await;
        let moved = app.move_channel(&channel.id, &destination.id, &alice.id).await.unwrap();
        assert_eq!(moved.team_id, destination.id);

        let posts = app.store().posts().get_for_channel(&channel.id, 10).await.unwrap();
        assert!(posts.iter().any(|p| p.post_type == PostType::MoveChannel));

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn moving_rehomes_webhooks() {
        use crate::model::IncomingWebhook;

        let srv = test_server().await;
        let app = App::new(srv.clone());

        let source = seeded_team(&app, "acme").await;
        let destination = seeded_team(&app, "globex").await;
        let channel = seeded_channel(&app, &source.id, "dev", ChannelType::Open).await;
        let alice = seeded_user(&app, "alice").await;

        let hook = IncomingWebhook::new(&alice.id, &channel.id, &source.id);
        app.store().webhooks().save_incoming(&hook).await.unwrap();

        app.move_channel(&channel.id, &destination.id, "").await.unwrap();

        let hooks = app.store().webhooks().get_incoming_by_channel(&channel.id).await.unwrap();
        assert_eq!(hooks[0].team_id, destination.id);

        srv.shutdown().await;
    }
}
