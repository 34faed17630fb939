//! Presence status entity and state constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_AWAY: &str = "away";
pub const STATUS_DND: &str = "dnd";
pub const STATUS_OFFLINE: &str = "offline";
pub const STATUS_OUT_OF_OFFICE: &str = "ooo";

/// Floor between consecutive last-activity store writes for an unchanged
/// status. This is the write-amplification guard under activity-ping load.
pub const STATUS_MIN_UPDATE_TIME: Duration = Duration::from_secs(120);

/// Presence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Online,
    Away,
    Dnd,
    Offline,
    #[serde(rename = "ooo")]
    OutOfOffice,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => STATUS_ONLINE,
            Self::Away => STATUS_AWAY,
            Self::Dnd => STATUS_DND,
            Self::Offline => STATUS_OFFLINE,
            Self::OutOfOffice => STATUS_OUT_OF_OFFICE,
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<Self> {
        match tag {
            STATUS_ONLINE => Some(Self::Online),
            STATUS_AWAY => Some(Self::Away),
            STATUS_DND => Some(Self::Dnd),
            STATUS_OFFLINE => Some(Self::Offline),
            STATUS_OUT_OF_OFFICE => Some(Self::OutOfOffice),
            _ => None,
        }
    }
}

/// A user's presence row.
///
/// The in-process cache is authoritative for reads during a node's lifetime;
/// the store copy serves cold reads and cross-node bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub user_id: String,
    pub status: StatusState,
    /// True when the user picked this state explicitly. Manual states win
    /// over automatic transitions.
    pub manual: bool,
    pub last_activity_at: i64,
    /// Channel the user is actively viewing, for notification suppression.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub active_channel: String,
}

impl Status {
    pub fn new_offline(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            status: StatusState::Offline,
            manual: false,
            last_activity_at: 0,
            active_channel: String::new(),
        }
    }
}

/// Opaque emoji + text attached to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomStatus {
    pub emoji: String,
    pub text: String,
}

/// Bound on the recent-custom-status preference list.
pub const MAX_RECENT_CUSTOM_STATUSES: usize = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tags_round_trip() {
        for s in [
            StatusState::Online,
            StatusState::Away,
            StatusState::Dnd,
            StatusState::Offline,
            StatusState::OutOfOffice,
        ] {
            assert_eq!(StatusState::from_str_tag(s.as_str()), Some(s));
        }
        assert_eq!(StatusState::from_str_tag("napping"), None);
    }

    #[test]
    fn status_serializes_with_wire_names() {
        let status = Status {
            user_id: "u".into(),
            status: StatusState::OutOfOffice,
            manual: true,
            last_activity_at: 7,
            active_channel: String::new(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "ooo");
        assert_eq!(json["manual"], true);
        assert!(json.get("active_channel").is_none());
    }
}
