//! Channel membership rows and unread counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::now_millis;

/// Per-user, per-channel membership with read cursors and notify overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: String,
    pub user_id: String,
    pub roles: String,
    pub last_viewed_at: i64,
    pub msg_count: i64,
    pub mention_count: i64,
    pub notify_props: BTreeMap<String, String>,
    pub last_update_at: i64,
    pub scheme_user: bool,
    pub scheme_admin: bool,
    pub scheme_guest: bool,
}

impl ChannelMember {
    pub fn new(channel_id: &str, user_id: &str) -> Self {
        let now = now_millis();
        let mut notify_props = BTreeMap::new();
        notify_props.insert("desktop".to_string(), "default".to_string());
        notify_props.insert("email".to_string(), "default".to_string());
        notify_props.insert("mark_unread".to_string(), "all".to_string());
        notify_props.insert("push".to_string(), "default".to_string());
        notify_props.insert("ignore_channel_mentions".to_string(), "default".to_string());
        Self {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            roles: String::new(),
            last_viewed_at: 0,
            msg_count: 0,
            mention_count: 0,
            notify_props,
            last_update_at: now,
            scheme_user: false,
            scheme_admin: false,
            scheme_guest: false,
        }
    }

    pub fn is_channel_admin(&self) -> bool {
        self.scheme_admin
    }
}

/// Append-only join/leave audit trail. `leave_time` is unset while the
/// membership is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMemberHistory {
    pub channel_id: String,
    pub user_id: String,
    pub join_time: i64,
    pub leave_time: Option<i64>,
}

/// Unread summary for one user in one channel, derived from the channel's
/// total counts minus the member's cursors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelUnread {
    pub team_id: String,
    pub channel_id: String,
    pub msg_count: i64,
    pub mention_count: i64,
    pub notify_props: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_member_has_default_notify_props() {
        let m = ChannelMember::new("c1", "u1");
        assert_eq!(m.notify_props.get("desktop").map(String::as_str), Some("default"));
        assert_eq!(m.notify_props.get("mark_unread").map(String::as_str), Some("all"));
        assert!(!m.is_channel_admin());
    }
}
