//! Channel creation: team channels, direct messages, group messages.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RestrictDirectMessage;
use crate::error::{AppError, AppResult};
use crate::model::{
    Channel, ChannelMember, ChannelType, GROUP_CHANNEL_MAX_USERS, GROUP_CHANNEL_MIN_USERS, User,
    direct_channel_name, group_channel_name, now_millis,
};
use crate::server::App;
use crate::store::StoreError;
use crate::ws::events::{EVENT_CHANNEL_CREATED, EVENT_DIRECT_ADDED, EVENT_GROUP_ADDED};
use crate::ws::{Broadcast, WebSocketEvent};

/// How long a direct-channel creator waits for their own membership to
/// become readable before giving up and answering anyway.
const MEMBERSHIP_WAIT: Duration = Duration::from_secs(12);
const MEMBERSHIP_POLL: Duration = Duration::from_millis(100);

/// Group display names list the member usernames, clipped to the column.
const GROUP_DISPLAY_NAME_MAX_CHARS: usize = 64;

impl App {
    /// Creates an open or private team channel. With `add_member` the
    /// creator is written in as the first channel admin.
    pub async fn create_channel(&self, mut channel: Channel, add_member: bool) -> AppResult<Channel> {
        if !channel.channel_type.is_team_scoped() {
            return Err(AppError::invalid_input(
                "app.channel.create_channel.direct_channel.app_error",
                "direct and group channels use their own creation paths",
            ));
        }
        channel.pre_save();
        channel.is_valid()?;

        let limit = self.config().team.max_channels_per_team;
        let count = self.store().channels().count_for_team(&channel.team_id).await?;
        if count >= limit {
            return Err(AppError::limit_exceeded(
                "app.channel.create_channel.max_channel_limit.app_error",
                "channel limit for this team reached",
            )
            .with_detail(format!("limit={limit}")));
        }

        match self.store().channels().save(&channel).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                return Err(AppError::conflict(
                    "app.channel.create_channel.exists.app_error",
                    "a channel with that name already exists on this team",
                )
                .with_detail(format!("name={}", channel.name)));
            }
            Err(err) => return Err(err.into()),
        }

        if add_member {
            let creator = self.get_user(&channel.creator_id).await?;
            self.save_member_with_history(&channel, &creator, true).await?;
            self.invalidate_cache_for_user(&creator.id).await;
        }

        {
            let app = self.clone();
            let created = channel.clone();
            self.go(async move {
                app.srv().plugins().channel_has_been_created(&created).await;
            });
        }

        if !channel.creator_id.is_empty() {
            let event = WebSocketEvent::new(
                EVENT_CHANNEL_CREATED,
                Broadcast::to_user(&channel.creator_id),
            )
            .add("channel_id", channel.id.as_str())
            .add("team_id", channel.team_id.as_str());
            self.publish(event).await;
        }

        Ok(channel)
    }

    /// Returns the direct channel between two users, creating it on first
    /// use. The canonical name derived from the user id pair makes the
    /// operation commutative: both orders and both racers end up with the
    /// same channel. A user id paired with itself is the self-DM.
    pub async fn get_or_create_direct_channel(
        &self,
        user_id: &str,
        other_user_id: &str,
    ) -> AppResult<Channel> {
        let name = direct_channel_name(user_id, other_user_id);
        match self.store().channels().get_by_name("", &name, true).await {
            Ok(existing) => return Ok(existing),
            Err(StoreError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        if self.config().team.restrict_direct_message == RestrictDirectMessage::Team
            && user_id != other_user_id
            && !self.store().teams().users_share_team(user_id, other_user_id).await?
        {
            return Err(AppError::forbidden(
                "app.channel.create_direct_channel.restricted.app_error",
                "direct messages are restricted to users who share a team",
            ));
        }

        // Both profiles load concurrently, each task answering on its own
        // single-use channel.
        let (tx_a, rx_a) = oneshot::channel();
        {
            let app = self.clone();
            let id = user_id.to_string();
            self.go(async move {
                let _ = tx_a.send(app.get_user(&id).await);
            });
        }
        let (tx_b, rx_b) = oneshot::channel();
        {
            let app = self.clone();
            let id = other_user_id.to_string();
            self.go(async move {
                let _ = tx_b.send(app.get_user(&id).await);
            });
        }
        let user = super::recv_result(rx_a).await?;
        let other_user = super::recv_result(rx_b).await?;

        let mut channel = Channel::new("", ChannelType::Direct, &name, &name);
        channel.pre_save();
        let member = direct_member(&channel.id, &user);
        let other_member = direct_member(&channel.id, &other_user);

        match self
            .store()
            .channels()
            .save_direct_channel(&channel, &member, &other_member)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                // Lost the creation race; the winner's row is the answer.
                debug!(name = %name, "direct channel creation raced");
                return self
                    .store()
                    .channels()
                    .get_by_name("", &name, true)
                    .await
                    .map_err(Into::into);
            }
            Err(err) => return Err(err.into()),
        }

        let now = now_millis();
        self.store()
            .channels()
            .log_join_event(&channel.id, &user.id, now)
            .await?;
        if user.id != other_user.id {
            self.store()
                .channels()
                .log_join_event(&channel.id, &other_user.id, now)
                .await?;
        }

        self.wait_for_channel_membership(&channel.id, user_id).await;

        self.invalidate_cache_for_user(user_id).await;
        if user_id != other_user_id {
            self.invalidate_cache_for_user(other_user_id).await;
        }

        {
            let app = self.clone();
            let created = channel.clone();
            self.go(async move {
                app.srv().plugins().channel_has_been_created(&created).await;
            });
        }

        let event = WebSocketEvent::new(EVENT_DIRECT_ADDED, Broadcast::to_channel(&channel.id))
            .add("creator_id", user_id)
            .add("teammate_id", other_user_id);
        self.publish(event).await;

        Ok(channel)
    }

    /// Creates (or returns) the group channel for a member set. The
    /// creator always counts toward the set; the canonical name hashed
    /// from the sorted ids makes repeat calls land on the same channel.
    pub async fn create_group_channel(
        &self,
        user_ids: &[String],
        creator_id: &str,
    ) -> AppResult<Channel> {
        let mut member_ids: Vec<String> = user_ids.to_vec();
        if !member_ids.iter().any(|id| id == creator_id) {
            member_ids.push(creator_id.to_string());
        }
        member_ids.sort_unstable();
        member_ids.dedup();

        if !(GROUP_CHANNEL_MIN_USERS..=GROUP_CHANNEL_MAX_USERS).contains(&member_ids.len()) {
            return Err(AppError::invalid_input(
                "app.channel.create_group.bad_size.app_error",
                "group channels take 3 to 8 distinct members",
            )
            .with_detail(format!("got={}", member_ids.len())));
        }

        let users = self.store().users().get_many(&member_ids).await?;
        if users.len() != member_ids.len() {
            return Err(AppError::invalid_input(
                "app.channel.create_group.missing_user.app_error",
                "one or more group members do not exist",
            ));
        }

        let name = group_channel_name(&member_ids);
        let mut usernames: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        usernames.sort_unstable();
        let display_name: String = usernames
            .join(", ")
            .chars()
            .take(GROUP_DISPLAY_NAME_MAX_CHARS)
            .collect();

        let mut channel = Channel::new("", ChannelType::Group, &display_name, &name);
        channel.creator_id = creator_id.to_string();
        channel.pre_save();

        match self.store().channels().save(&channel).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                // The same member set already has its channel.
                return self
                    .store()
                    .channels()
                    .get_by_name("", &name, true)
                    .await
                    .map_err(Into::into);
            }
            Err(err) => return Err(err.into()),
        }

        for user in &users {
            self.save_member_with_history(&channel, user, false).await?;
            self.invalidate_cache_for_user(&user.id).await;
        }

        let event = WebSocketEvent::new(EVENT_GROUP_ADDED, Broadcast::to_channel(&channel.id))
            .add("teammate_ids", member_ids);
        self.publish(event).await;

        Ok(channel)
    }

    /// Replica reads may lag the membership write; the creator's first
    /// fetch of the new channel must not 404. Polls until the member row
    /// reads back or the deadline passes, then answers either way.
    async fn wait_for_channel_membership(&self, channel_id: &str, user_id: &str) {
        // A single-source database reads its own writes.
        if !self.config().sql.has_replicas() {
            return;
        }
        let deadline = Instant::now() + MEMBERSHIP_WAIT;
        loop {
            if self.store().channels().get_member(channel_id, user_id).await.is_ok() {
                return;
            }
            if Instant::now() >= deadline {
                warn!(channel_id, user_id, "direct channel membership never became readable");
                return;
            }
            tokio::time::sleep(MEMBERSHIP_POLL).await;
        }
    }
}

fn direct_member(channel_id: &str, user: &User) -> ChannelMember {
    let mut member = ChannelMember::new(channel_id, &user.id);
    if user.is_guest() {
        member.scheme_guest = true;
    } else {
        member.scheme_user = true;
    }
    member
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{join_team, seeded_team, seeded_user};
    use crate::config::RestrictDirectMessage;
    use crate::model::{Channel, ChannelType, new_id};
    use crate::server::App;
    use crate::server::tests::{test_config, test_server};

    #[tokio::test]
    async fn creator_becomes_channel_admin_with_history() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = seeded_team(&app, "acme").await;
        let creator = seeded_user(&app, "alice").await;
        join_team(&app, &team.id, &creator.id).await;

        let mut channel = Channel::new(&team.id, ChannelType::Open, "General", "general");
        channel.creator_id = creator.id.clone();
        let channel = app.create_channel(channel, true).await.unwrap();

        let member = app.get_channel_member(&channel.id, &creator.id).await.unwrap();
        assert!(member.scheme_admin);
        assert!(member.scheme_user);

        let history = app
            .store()
            .channels()
            .get_member_history(&channel.id)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_id, creator.id);
        assert!(history[0].leave_time.is_none());

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_name_on_team_conflicts() {
        let srv = test_server().await;
        let app = App::new(srv.clone());
        let team = seeded_team(&app, "acme").await;

        let first = Channel::new(&team.id, ChannelType::Open, "Dev", "dev");
        app.create_channel(first, false).await.unwrap();

        let second = Channel::new(&team.id, ChannelType::Private, "Dev Two", "dev");
        let err = app.create_channel(second, false).await.unwrap_err();
        assert_eq!(err.id(), "app.channel.create_channel.exists.app_error");
        // Conflicts surface as 400 with the sub-code in the id.
        assert_eq!(err.http_status(), 400);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn direct_type_is_rejected() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let channel = Channel::new("", ChannelType::Direct, "dm", "dm");
        let err = app.create_channel(channel, false).await.unwrap_err();
        assert_eq!(err.id(), "app.channel.create_channel.direct_channel.app_error");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn team_channel_limit_is_enforced() {
        let srv = test_server().await;
        let mut cfg = test_config();
        cfg.team.max_channels_per_team = 1;
        srv.config().set(cfg);
        let app = App::new(srv.clone());
        let team = seeded_team(&app, "acme").await;

        app.create_channel(Channel::new(&team.id, ChannelType::Open, "One", "one"), false)
            .await
            .unwrap();
        let err = app
            .create_channel(Channel::new(&team.id, ChannelType::Open, "Two", "two"), false)
            .await
            .unwrap_err();
        assert_eq!(err.id(), "app.channel.create_channel.max_channel_limit.app_error");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn direct_channel_is_commutative() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let alice = seeded_user(&app, "alice").await;
        let bob = seeded_user(&app, "bob").await;

        let first = app.get_or_create_direct_channel(&alice.id, &bob.id).await.unwrap();
        let second = app.get_or_create_direct_channel(&bob.id, &alice.id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.channel_type, ChannelType::Direct);

        let members = app.store().channels().get_members(&first.id).await.unwrap();
        assert_eq!(members.len(), 2);

        // One join-history row per side, not per call.
        let history = app.store().channels().get_member_history(&first.id).await.unwrap();
        assert_eq!(history.len(), 2);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn self_direct_channel_has_one_member() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let alice = seeded_user(&app, "alice").await;
        let channel = app.get_or_create_direct_channel(&alice.id, &alice.id).await.unwrap();

        let members = app.store().channels().get_members(&channel.id).await.unwrap();
        assert_eq!(members.len(), 1);
        let history = app.store().channels().get_member_history(&channel.id).await.unwrap();
        assert_eq!(history.len(), 1);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn restricted_direct_messages_require_shared_team() {
        let srv = test_server().await;
        let mut cfg = test_config();
        cfg.team.restrict_direct_message = RestrictDirectMessage::Team;
        srv.config().set(cfg);
        let app = App::new(srv.clone());

        let alice = seeded_user(&app, "alice").await;
        let bob = seeded_user(&app, "bob").await;

        let err = app.get_or_create_direct_channel(&alice.id, &bob.id).await.unwrap_err();
        assert_eq!(err.id(), "app.channel.create_direct_channel.restricted.app_error");
        assert_eq!(err.http_status(), 403);

        let team = seeded_team(&app, "acme").await;
        join_team(&app, &team.id, &alice.id).await;
        join_team(&app, &team.id, &bob.id).await;
        app.get_or_create_direct_channel(&alice.id, &bob.id).await.unwrap();

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn group_channel_is_idempotent_for_a_member_set() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let creator = seeded_user(&app, "alice").await;
        let bob = seeded_user(&app, "bob").await;
        let carol = seeded_user(&app, "carol").await;
        let ids = vec![bob.id.clone(), carol.id.clone()];

        let first = app.create_group_channel(&ids, &creator.id).await.unwrap();
        assert_eq!(first.channel_type, ChannelType::Group);
        assert_eq!(first.display_name, "alice, bob, carol");

        // Same set in a different order resolves to the same channel.
        let reordered = vec![carol.id.clone(), bob.id.clone(), creator.id.clone()];
        let second = app.create_group_channel(&reordered, &creator.id).await.unwrap();
        assert_eq!(first.id, second.id);

        let members = app.store().channels().get_members(&first.id).await.unwrap();
        assert_eq!(members.len(), 3);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn group_channel_size_bounds() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let creator = seeded_user(&app, "alice").await;
        let bob = seeded_user(&app, "bob").await;

        // Two distinct members is a direct message, not a group.
        let err = app
            .create_group_channel(&[bob.id.clone()], &creator.id)
            .await
            .unwrap_err();
        assert_eq!(err.id(), "app.channel.create_group.bad_size.app_error");

        let mut ids: Vec<String> = Vec::new();
        for i in 0..8 {
            ids.push(seeded_user(&app, &format!("user{i}")).await.id);
        }
        let err = app.create_group_channel(&ids, &creator.id).await.unwrap_err();
        assert_eq!(err.id(), "app.channel.create_group.bad_size.app_error");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn group_channel_rejects_unknown_members() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let creator = seeded_user(&app, "alice").await;
        let bob = seeded_user(&app, "bob").await;
        let ids = vec![bob.id.clone(), new_id()];

        let err = app.create_group_channel(&ids, &creator.id).await.unwrap_err();
        assert_eq!(err.id(), "app.channel.create_group.missing_user.app_error");

        srv.shutdown().await;
    }
}
