//! Presence state machine.
//!
//! Transitions arrive from three directions: explicit user choices (the
//! manual states), connection lifecycle (the first register marks a user
//! online, the last disconnect marks them offline), and activity pings from
//! open clients. A manual state always wins over an automatic transition,
//! with one exception: a disconnect takes a manually-online or manually-away
//! user offline, because a state that claims presence is meaningless without
//! a connection. Manual do-not-disturb and out-of-office survive
//! disconnects.
//!
//! The in-process cache is the authority for reads. Store writes are elided
//! when nothing but recent activity changed inside
//! [`STATUS_MIN_UPDATE_TIME`], so a burst of activity pings does not become
//! a row write per request.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::model::{
    now_millis, CustomStatus, Preference, Status, StatusState, CATEGORY_CUSTOM_STATUS,
    MAX_RECENT_CUSTOM_STATUSES, NAME_RECENT_CUSTOM_STATUSES, STATUS_MIN_UPDATE_TIME,
};
use crate::server::App;
use crate::store::StoreError;
use crate::ws::events::{EVENT_STATUS_CHANGE, EVENT_USER_UPDATED};
use crate::ws::{Broadcast, WebSocketEvent};

/// Longest accepted custom status text, in characters.
pub const CUSTOM_STATUS_MAX_TEXT: usize = 100;

impl App {
    /// Current status for one user. The cache is consulted first, the store
    /// only on a miss; a user without any status row is an error here, not
    /// a default.
    pub async fn get_status(&self, user_id: &str) -> AppResult<Status> {
        if let Some(status) = self.srv().status_cache().get(user_id) {
            return Ok(status);
        }
        match self.store().statuses().get(user_id).await {
            Ok(status) => {
                self.srv().status_cache().set(status.clone());
                Ok(status)
            }
            Err(StoreError::NotFound { .. }) => Err(AppError::not_found(
                "app.status.get.missing.app_error",
                "no status for user",
            )
            .with_detail(format!("user_id={}", user_id))),
            Err(err) => Err(err.into()),
        }
    }

    /// Statuses for a set of users, one entry per requested id in request
    /// order. Cache misses are collected into a single store read; users
    /// unknown to both layers read as offline and are not cached.
    pub async fn get_statuses_by_ids(&self, user_ids: &[String]) -> AppResult<Vec<Status>> {
        let cache = self.srv().status_cache();
        let mut found: HashMap<String, Status> = HashMap::with_capacity(user_ids.len());
        let mut misses: Vec<String> = Vec::new();
        for id in user_ids {
            match cache.get(id) {
                Some(status) => {
                    found.insert(id.clone(), status);
                }
                None => misses.push(id.clone()),
            }
        }

        if !misses.is_empty() {
            for status in self.store().statuses().get_many(&misses).await? {
                cache.set(status.clone());
                found.insert(status.user_id.clone(), status);
            }
        }

        Ok(user_ids
            .iter()
            .map(|id| {
                found
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| Status::new_offline(id))
            })
            .collect())
    }

    /// Snapshot of every cached status as a `user_id -> state` map. Serves
    /// the bulk `get_statuses` action without touching the store.
    pub fn cached_status_map(&self) -> Map<String, Value> {
        let mut out = Map::new();
        if !self.config().service.enable_user_statuses {
            return out;
        }
        self.srv().status_cache().for_each(|status| {
            out.insert(
                status.user_id.clone(),
                Value::String(status.status.as_str().to_string()),
            );
        });
        out
    }

    /// Marks a user online. Non-manual calls (connection register, activity)
    /// never override a manual state.
    pub async fn set_status_online(&self, user_id: &str, manual: bool) -> AppResult<Status> {
        if !self.config().service.enable_user_statuses {
            return Ok(Status::new_offline(user_id));
        }
        let old = self.status_or_offline(user_id).await;
        if old.manual && !manual {
            return Ok(old);
        }

        let mut status = old.clone();
        status.status = StatusState::Online;
        status.manual = manual;
        status.last_activity_at = now_millis();
        Ok(self.apply_status(status, &old).await)
    }

    /// Marks a user offline. A non-manual call is the disconnect path; it
    /// is ignored only for manual do-not-disturb and out-of-office.
    pub async fn set_status_offline(&self, user_id: &str, manual: bool) -> AppResult<Status> {
        if !self.config().service.enable_user_statuses {
            return Ok(Status::new_offline(user_id));
        }
        let old = self.status_or_offline(user_id).await;
        if old.manual
            && !manual
            && matches!(old.status, StatusState::Dnd | StatusState::OutOfOffice)
        {
            return Ok(old);
        }

        let mut status = old.clone();
        status.status = StatusState::Offline;
        status.manual = manual;
        status.last_activity_at = now_millis();
        status.active_channel.clear();
        Ok(self.apply_status(status, &old).await)
    }

    /// Marks a user away. Non-manual calls only fire once the user has been
    /// idle past the configured timeout and never override a manual state;
    /// a manual call forces away immediately.
    pub async fn set_status_away_if_needed(
        &self,
        user_id: &str,
        manual: bool,
    ) -> AppResult<Status> {
        if !self.config().service.enable_user_statuses {
            return Ok(Status::new_offline(user_id));
        }
        let old = self.status_or_offline(user_id).await;
        if !manual {
            if old.manual {
                return Ok(old);
            }
            if old.status == StatusState::Away {
                return Ok(old);
            }
            let idle_floor = self.config().service.user_status_away_timeout_secs * 1000;
            if now_millis() - old.last_activity_at < idle_floor {
                return Ok(old);
            }
        }

        let mut status = old.clone();
        status.status = StatusState::Away;
        status.manual = manual;
        status.active_channel.clear();
        Ok(self.apply_status(status, &old).await)
    }

    /// Do-not-disturb is always a manual choice and sticks until the user
    /// changes it.
    pub async fn set_status_do_not_disturb(&self, user_id: &str) -> AppResult<Status> {
        if !self.config().service.enable_user_statuses {
            return Ok(Status::new_offline(user_id));
        }
        let old = self.status_or_offline(user_id).await;
        let mut status = old.clone();
        status.status = StatusState::Dnd;
        status.manual = true;
        Ok(self.apply_status(status, &old).await)
    }

    /// Out-of-office is always a manual choice and sticks until the user
    /// changes it.
    pub async fn set_status_out_of_office(&self, user_id: &str) -> AppResult<Status> {
        if !self.config().service.enable_user_statuses {
            return Ok(Status::new_offline(user_id));
        }
        let old = self.status_or_offline(user_id).await;
        let mut status = old.clone();
        status.status = StatusState::OutOfOffice;
        status.manual = true;
        Ok(self.apply_status(status, &old).await)
    }

    /// Records client activity for a user with a known status, then runs the
    /// idle check. Cache-only; the elision window in the next real
    /// transition picks the timestamp up for the store.
    pub async fn set_status_last_activity_at(&self, user_id: &str, activity_at: i64) {
        if !self.config().service.enable_user_statuses {
            return;
        }
        let Ok(mut status) = self.get_status(user_id).await else {
            return;
        };
        status.last_activity_at = activity_at;
        self.srv().status_cache().set(status);

        if let Err(err) = self.set_status_away_if_needed(user_id, false).await {
            debug!(user_id, error = %err, "idle check after activity failed");
        }
    }

    /// Tracks which channel the user is viewing, for notification
    /// suppression. Viewing a channel is activity, so a non-manual user is
    /// also pulled back online. Cache-only.
    pub async fn set_active_channel(&self, user_id: &str, channel_id: &str) {
        if !self.config().service.enable_user_statuses {
            return;
        }
        let cache = self.srv().status_cache();
        let old_state = cache
            .get(user_id)
            .map(|s| s.status)
            .unwrap_or(StatusState::Offline);
        let status = cache.update(user_id, |s| {
            s.active_channel = channel_id.to_string();
            if !s.manual && !channel_id.is_empty() {
                s.status = StatusState::Online;
            }
            s.last_activity_at = now_millis();
        });
        if status.status != old_state {
            metrics::record_status_transition(status.status.as_str());
            self.broadcast_status(&status).await;
        }
    }

    /// Pushes a status change to the user's own connections on every node.
    /// Suppressed while the server is in a maintenance busy window.
    pub async fn broadcast_status(&self, status: &Status) {
        if self.srv().busy().is_busy() {
            return;
        }
        let event = WebSocketEvent::new(EVENT_STATUS_CHANGE, Broadcast::to_user(&status.user_id))
            .add("user_id", status.user_id.as_str())
            .add("status", status.status.as_str());
        self.publish(event).await;
    }

    /// Sets the emoji + text shown next to a user's name, records it in the
    /// recent list, and announces the profile change.
    pub async fn set_custom_status(&self, user_id: &str, custom: CustomStatus) -> AppResult<()> {
        if custom.emoji.is_empty() && custom.text.is_empty() {
            return Err(AppError::invalid_input(
                "app.custom_status.set.empty.app_error",
                "custom status needs an emoji or text",
            ));
        }
        if custom.text.chars().count() > CUSTOM_STATUS_MAX_TEXT {
            return Err(AppError::invalid_input(
                "app.custom_status.set.text_length.app_error",
                format!("custom status text is limited to {} characters", CUSTOM_STATUS_MAX_TEXT),
            ));
        }

        match self
            .store()
            .users()
            .update_custom_status(user_id, Some(&custom), now_millis())
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                return Err(AppError::not_found(
                    "app.user.get.missing.app_error",
                    "user not found",
                )
                .with_detail(format!("user_id={}", user_id)));
            }
            Err(err) => return Err(err.into()),
        }
        self.push_recent_custom_status(user_id, &custom).await?;

        self.invalidate_cache_for_user(user_id).await;
        self.publish_user_updated(user_id).await
    }

    /// Clears the custom status and announces the profile change. The recent
    /// list keeps its entries so the user can re-pick one.
    pub async fn remove_custom_status(&self, user_id: &str) -> AppResult<()> {
        match self
            .store()
            .users()
            .update_custom_status(user_id, None, now_millis())
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                return Err(AppError::not_found(
                    "app.user.get.missing.app_error",
                    "user not found",
                )
                .with_detail(format!("user_id={}", user_id)));
            }
            Err(err) => return Err(err.into()),
        }

        self.invalidate_cache_for_user(user_id).await;
        self.publish_user_updated(user_id).await
    }

    /// Cache, then store, then a fresh offline row. Never fails: transitions
    /// work from whatever state is known.
    async fn status_or_offline(&self, user_id: &str) -> Status {
        if let Some(status) = self.srv().status_cache().get(user_id) {
            return status;
        }
        match self.store().statuses().get(user_id).await {
            Ok(status) => {
                self.srv().status_cache().set(status.clone());
                status
            }
            Err(StoreError::NotFound { .. }) => Status::new_offline(user_id),
            Err(err) => {
                warn!(user_id, error = %err, "status read failed, treating as offline");
                Status::new_offline(user_id)
            }
        }
    }

    /// Shared transition tail: the cache always takes the new value, the
    /// store write is elided for pure activity refreshes inside the update
    /// window, and only real state changes broadcast.
    async fn apply_status(&self, status: Status, old: &Status) -> Status {
        let state_changed = status.status != old.status;
        let manual_changed = status.manual != old.manual;
        let elapsed = status.last_activity_at - old.last_activity_at;

        self.srv().status_cache().set(status.clone());

        if state_changed
            || manual_changed
            || elapsed > STATUS_MIN_UPDATE_TIME.as_millis() as i64
        {
            if let Err(err) = self.store().statuses().upsert(&status).await {
                warn!(
                    user_id = %status.user_id,
                    error = %err,
                    "status write failed; cache still updated"
                );
            }
        }

        if state_changed {
            metrics::record_status_transition(status.status.as_str());
            self.broadcast_status(&status).await;
        }
        status
    }

    async fn push_recent_custom_status(
        &self,
        user_id: &str,
        custom: &CustomStatus,
    ) -> AppResult<()> {
        let mut recents: Vec<CustomStatus> = match self
            .store()
            .preferences()
            .get(user_id, CATEGORY_CUSTOM_STATUS, NAME_RECENT_CUSTOM_STATUSES)
            .await
        {
            Ok(pref) => serde_json::from_str(&pref.value).unwrap_or_else(|err| {
                warn!(user_id, error = %err, "resetting unreadable recent custom status list");
                Vec::new()
            }),
            Err(StoreError::NotFound { .. }) => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        recents.retain(|entry| entry != custom);
        recents.insert(0, custom.clone());
        recents.truncate(MAX_RECENT_CUSTOM_STATUSES);

        let encoded = serde_json::to_string(&recents).map_err(|err| {
            AppError::internal(
                "app.custom_status.set.encode.app_error",
                "failed to encode recent custom statuses",
            )
            .with_detail(err.to_string())
        })?;
        let pref = Preference::new(
            user_id,
            CATEGORY_CUSTOM_STATUS,
            NAME_RECENT_CUSTOM_STATUSES,
            &encoded,
        );
        self.store().preferences().save(&[pref]).await?;
        Ok(())
    }

    /// Fans a sanitized copy of the profile out to every connected client.
    async fn publish_user_updated(&self, user_id: &str) -> AppResult<()> {
        let mut user = self.get_user(user_id).await?;
        let cfg = self.config();
        user.sanitize(cfg.privacy.show_email_address, cfg.privacy.show_full_name);
        let payload = serde_json::to_value(&user).map_err(|err| {
            AppError::internal(
                "app.user.update.encode.app_error",
                "failed to encode user",
            )
            .with_detail(err.to_string())
        })?;
        let event = WebSocketEvent::new(EVENT_USER_UPDATED, Broadcast::all()).add("user", payload);
        self.publish(event).await;
        Ok(())
    }
}
