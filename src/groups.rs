//! Group lifecycle and team/channel sync bindings.
//!
//! A group binds to teams and channels through syncable rows; the
//! group-constrained membership checks in the channel module reduce to
//! those rows. A channel binding only exists under a binding to the
//! channel's team, and the team binding cannot go away while channel
//! bindings on that team remain. Deleting a group detaches everything.

use serde_json::json;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::model::{GROUP_SOURCE_LDAP, Group, GroupSyncable, GroupSyncableType, now_millis};
use crate::server::App;
use crate::store::StoreError;
use crate::ws::events::{
    EVENT_RECEIVED_GROUP, EVENT_RECEIVED_GROUP_ASSOCIATED_TO_CHANNEL,
    EVENT_RECEIVED_GROUP_ASSOCIATED_TO_TEAM, EVENT_RECEIVED_GROUP_NOT_ASSOCIATED_TO_CHANNEL,
    EVENT_RECEIVED_GROUP_NOT_ASSOCIATED_TO_TEAM,
};
use crate::ws::{Broadcast, WebSocketEvent};

impl App {
    pub async fn create_group(&self, group: Group) -> AppResult<Group> {
        group.is_valid()?;
        match self.store().groups().save(&group).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                return Err(AppError::conflict(
                    "app.group.create.exists.app_error",
                    "a group with that name already exists",
                )
                .with_detail(format!("name={}", group.name)));
            }
            Err(err) => return Err(err.into()),
        }
        info!(group_id = %group.id, source = %group.source, "group created");

        let event =
            WebSocketEvent::new(EVENT_RECEIVED_GROUP, Broadcast::all()).add("group", json!(group));
        self.publish(event).await;
        Ok(group)
    }

    pub async fn get_group(&self, group_id: &str) -> AppResult<Group> {
        self.store()
            .groups()
            .get(group_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound { .. } => {
                    AppError::not_found("app.group.get.missing.app_error", "group not found")
                        .with_detail(format!("group_id={group_id}"))
                }
                other => other.into(),
            })
    }

    /// Writes back an edited group. The name and source are fixed at
    /// creation; only the mutable columns move.
    pub async fn update_group(&self, mut group: Group) -> AppResult<Group> {
        group.pre_update();
        group.is_valid()?;
        match self.store().groups().update(&group).await {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                return Err(AppError::not_found(
                    "app.group.get.missing.app_error",
                    "group not found",
                )
                .with_detail(format!("group_id={}", group.id)));
            }
            Err(err) => return Err(err.into()),
        }

        let event =
            WebSocketEvent::new(EVENT_RECEIVED_GROUP, Broadcast::all()).add("group", json!(group));
        self.publish(event).await;
        Ok(group)
    }

    /// Soft-deletes a group and detaches its bindings, channels before
    /// teams. Constrained-membership checks stop honoring the group the
    /// moment its syncables are gone.
    pub async fn delete_group(&self, group_id: &str) -> AppResult<Group> {
        let mut group = self.get_group(group_id).await?;
        let now = now_millis();

        for syncable_type in [GroupSyncableType::Channel, GroupSyncableType::Team] {
            let bindings = self
                .store()
                .groups()
                .syncables_for_group(group_id, syncable_type)
                .await?;
            for binding in bindings {
                self.store()
                    .groups()
                    .delete_syncable(group_id, &binding.syncable_id, syncable_type, now)
                    .await?;
                self.publish(detach_event(&binding)).await;
            }
        }

        self.store().groups().delete(group_id, now).await?;
        group.delete_at = now;
        group.update_at = now;
        info!(group_id, "group deleted");

        let event =
            WebSocketEvent::new(EVENT_RECEIVED_GROUP, Broadcast::all()).add("group", json!(group));
        self.publish(event).await;
        Ok(group)
    }

    pub async fn add_user_to_group(&self, group_id: &str, user_id: &str) -> AppResult<()> {
        let group = self.get_group(group_id).await?;
        require_manual_membership(&group)?;
        self.get_user(user_id).await?;
        self.store()
            .groups()
            .add_member(group_id, user_id, now_millis())
            .await?;
        Ok(())
    }

    /// Removing a user who is not a member is a no-op.
    pub async fn remove_user_from_group(&self, group_id: &str, user_id: &str) -> AppResult<()> {
        let group = self.get_group(group_id).await?;
        require_manual_membership(&group)?;
        self.store()
            .groups()
            .remove_member(group_id, user_id, now_millis())
            .await?;
        Ok(())
    }

    pub async fn get_group_member_ids(&self, group_id: &str) -> AppResult<Vec<String>> {
        self.get_group(group_id).await?;
        Ok(self.store().groups().member_ids(group_id).await?)
    }

    /// Creates or revives a binding. A channel binding demands a live
    /// binding to the channel's team first.
    pub async fn upsert_group_syncable(
        &self,
        mut syncable: GroupSyncable,
    ) -> AppResult<GroupSyncable> {
        self.get_group(&syncable.group_id).await?;

        match syncable.syncable_type {
            GroupSyncableType::Team => {
                self.store()
                    .teams()
                    .get(&syncable.syncable_id)
                    .await
                    .map_err(|err| match err {
                        StoreError::NotFound { .. } => {
                            AppError::not_found("app.team.get.missing.app_error", "team not found")
                                .with_detail(format!("team_id={}", syncable.syncable_id))
                        }
                        other => other.into(),
                    })?;
            }
            GroupSyncableType::Channel => {
                let channel = self.get_channel(&syncable.syncable_id).await?;
                let team_binding = self
                    .store()
                    .groups()
                    .get_syncable(&syncable.group_id, &channel.team_id, GroupSyncableType::Team)
                    .await?;
                if team_binding.is_none() {
                    return Err(AppError::invalid_input(
                        "app.group.upsert_syncable.team_not_linked.app_error",
                        "the group must be linked to the channel's team first",
                    )
                    .with_detail(format!("team_id={}", channel.team_id)));
                }
            }
        }

        // The upsert revives a previously detached binding in place.
        syncable.update_at = now_millis();
        syncable.delete_at = 0;
        self.store().groups().save_syncable(&syncable).await?;
        info!(
            group_id = %syncable.group_id,
            syncable_id = %syncable.syncable_id,
            syncable_type = syncable.syncable_type.as_str(),
            "group binding upserted"
        );

        self.publish(attach_event(&syncable)).await;
        Ok(syncable)
    }

    /// Detaches a binding. A team binding stays put while the group still
    /// binds channels on that team.
    pub async fn delete_group_syncable(
        &self,
        group_id: &str,
        syncable_id: &str,
        syncable_type: GroupSyncableType,
    ) -> AppResult<GroupSyncable> {
        let mut syncable = self
            .store()
            .groups()
            .get_syncable(group_id, syncable_id, syncable_type)
            .await?
            .ok_or_else(|| {
                AppError::not_found(
                    "app.group.get_syncable.missing.app_error",
                    "group binding not found",
                )
                .with_detail(format!("group_id={group_id} syncable_id={syncable_id}"))
            })?;

        if syncable_type == GroupSyncableType::Team {
            let channel_bindings = self
                .store()
                .groups()
                .syncables_for_group(group_id, GroupSyncableType::Channel)
                .await?;
            for binding in channel_bindings {
                match self.store().channels().get(&binding.syncable_id).await {
                    Ok(channel) if channel.team_id == syncable_id => {
                        return Err(AppError::invalid_input(
                            "app.group.delete_syncable.channels_remain.app_error",
                            "channel bindings on this team must be removed first",
                        )
                        .with_detail(format!("channel_id={}", binding.syncable_id)));
                    }
                    Ok(_) => {}
                    // A binding to an archived channel no longer pins the team.
                    Err(StoreError::NotFound { .. }) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        let now = now_millis();
        self.store()
            .groups()
            .delete_syncable(group_id, syncable_id, syncable_type, now)
            .await?;
        syncable.update_at = now;
        syncable.delete_at = now;
        info!(
            group_id,
            syncable_id,
            syncable_type = syncable_type.as_str(),
            "group binding removed"
        );

        self.publish(detach_event(&syncable)).await;
        Ok(syncable)
    }

    /// Groups bound to a channel, deleted groups filtered out.
    pub async fn get_groups_for_channel(&self, channel_id: &str) -> AppResult<Vec<Group>> {
        let bindings = self
            .store()
            .groups()
            .syncables_for_object(channel_id, GroupSyncableType::Channel)
            .await?;
        let mut groups = Vec::with_capacity(bindings.len());
        for binding in bindings {
            match self.store().groups().get(&binding.group_id).await {
                Ok(group) => groups.push(group),
                Err(StoreError::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(groups)
    }
}

/// Directory-mastered groups only change membership through their sync;
/// manual edits are reserved for custom groups.
fn require_manual_membership(group: &Group) -> AppResult<()> {
    if group.source == GROUP_SOURCE_LDAP {
        return Err(AppError::invalid_input(
            "app.group.membership_sync_managed.app_error",
            "group membership is managed by the directory sync",
        )
        .with_detail(format!("group_id={}", group.id)));
    }
    Ok(())
}

fn attach_event(syncable: &GroupSyncable) -> WebSocketEvent {
    let event = match syncable.syncable_type {
        GroupSyncableType::Team => WebSocketEvent::new(
            EVENT_RECEIVED_GROUP_ASSOCIATED_TO_TEAM,
            Broadcast::to_team(&syncable.syncable_id),
        ),
        GroupSyncableType::Channel => WebSocketEvent::new(
            EVENT_RECEIVED_GROUP_ASSOCIATED_TO_CHANNEL,
            Broadcast::to_channel(&syncable.syncable_id),
        ),
    };
    event.add("group_id", syncable.group_id.clone())
}

fn detach_event(syncable: &GroupSyncable) -> WebSocketEvent {
    let event = match syncable.syncable_type {
        GroupSyncableType::Team => WebSocketEvent::new(
            EVENT_RECEIVED_GROUP_NOT_ASSOCIATED_TO_TEAM,
            Broadcast::to_team(&syncable.syncable_id),
        ),
        GroupSyncableType::Channel => WebSocketEvent::new(
            EVENT_RECEIVED_GROUP_NOT_ASSOCIATED_TO_CHANNEL,
            Broadcast::to_channel(&syncable.syncable_id),
        ),
    };
    event.add("group_id", syncable.group_id.clone())
}
