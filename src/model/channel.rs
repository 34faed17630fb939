//! Channel entity and naming rules.

use crate::error::{AppError, AppResult};
use crate::model::{ID_LENGTH, is_valid_id, new_id, now_millis};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Smallest member set accepted by group channel creation (creator included).
pub const GROUP_CHANNEL_MIN_USERS: usize = 3;
/// Largest member set accepted by group channel creation.
pub const GROUP_CHANNEL_MAX_USERS: usize = 8;

/// Per-team default channel every member belongs to; cannot be deleted or
/// left behind.
pub const DEFAULT_CHANNEL_NAME: &str = "town-square";
/// Second stock channel newcomers join unless the default list overrides it.
pub const OFF_TOPIC_CHANNEL_NAME: &str = "off-topic";

const CHANNEL_NAME_MAX_LENGTH: usize = 64;
const CHANNEL_DISPLAY_NAME_MAX_LENGTH: usize = 64;
const CHANNEL_HEADER_MAX_LENGTH: usize = 1024;
const CHANNEL_PURPOSE_MAX_LENGTH: usize = 250;

/// Conversation endpoint type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    /// Public team channel, joinable by any team member.
    #[serde(rename = "O")]
    Open,
    /// Private team channel, membership by invitation.
    #[serde(rename = "P")]
    Private,
    /// Two-party conversation; no team scoping.
    #[serde(rename = "D")]
    Direct,
    /// Small fixed-set conversation; no team scoping.
    #[serde(rename = "G")]
    Group,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "O",
            Self::Private => "P",
            Self::Direct => "D",
            Self::Group => "G",
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<Self> {
        match tag {
            "O" => Some(Self::Open),
            "P" => Some(Self::Private),
            "D" => Some(Self::Direct),
            "G" => Some(Self::Group),
            _ => None,
        }
    }

    /// Direct and group channels live outside any team.
    pub fn is_team_scoped(&self) -> bool {
        matches!(self, Self::Open | Self::Private)
    }
}

/// A conversation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    /// Empty for direct and group channels.
    pub team_id: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub display_name: String,
    /// URL-safe name, unique per team.
    pub name: String,
    pub header: String,
    pub purpose: String,
    pub creator_id: String,
    pub scheme_id: Option<String>,
    pub group_constrained: bool,
    /// Running count of posts; unread math subtracts a member's cursor.
    pub total_msg_count: i64,
    pub last_post_at: i64,
}

impl Channel {
    pub fn new(team_id: &str, channel_type: ChannelType, display_name: &str, name: &str) -> Self {
        Self {
            id: new_id(),
            create_at: 0,
            update_at: 0,
            delete_at: 0,
            team_id: team_id.to_string(),
            channel_type,
            display_name: display_name.to_string(),
            name: name.to_string(),
            header: String::new(),
            purpose: String::new(),
            creator_id: String::new(),
            scheme_id: None,
            group_constrained: false,
            total_msg_count: 0,
            last_post_at: 0,
        }
    }

    /// Stamp create/update times ahead of the initial save.
    pub fn pre_save(&mut self) {
        if self.id.is_empty() {
            self.id = new_id();
        }
        let now = now_millis();
        self.create_at = now;
        self.update_at = now;
    }

    pub fn pre_update(&mut self) {
        self.update_at = now_millis();
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_at > 0
    }

    /// Whether this channel is the undeletable per-team default.
    pub fn is_default(&self, default_channel_name: &str) -> bool {
        self.name == default_channel_name
    }

    /// Structural validation; mirrors the checks applied before any save.
    pub fn is_valid(&self) -> AppResult<()> {
        if !is_valid_id(&self.id) {
            return Err(AppError::invalid_input(
                "model.channel.is_valid.id.app_error",
                "invalid channel id",
            ));
        }
        if self.create_at == 0 {
            return Err(AppError::invalid_input(
                "model.channel.is_valid.create_at.app_error",
                "create_at must be set",
            ));
        }
        if self.display_name.is_empty()
            || self.display_name.chars().count() > CHANNEL_DISPLAY_NAME_MAX_LENGTH
        {
            return Err(AppError::invalid_input(
                "model.channel.is_valid.display_name.app_error",
                "invalid display name",
            ));
        }
        if self.name.is_empty() || self.name.len() > CHANNEL_NAME_MAX_LENGTH {
            return Err(AppError::invalid_input(
                "model.channel.is_valid.name.app_error",
                "invalid channel name",
            ));
        }
        if self.header.chars().count() > CHANNEL_HEADER_MAX_LENGTH {
            return Err(AppError::invalid_input(
                "model.channel.is_valid.header.app_error",
                "header too long",
            ));
        }
        if self.purpose.chars().count() > CHANNEL_PURPOSE_MAX_LENGTH {
            return Err(AppError::invalid_input(
                "model.channel.is_valid.purpose.app_error",
                "purpose too long",
            ));
        }
        if self.channel_type.is_team_scoped() && self.team_id.len() != ID_LENGTH {
            return Err(AppError::invalid_input(
                "model.channel.is_valid.team_id.app_error",
                "team id required",
            ));
        }
        Ok(())
    }
}

/// Canonical direct-channel name: the two user ids sorted and joined.
///
/// Sorting makes the derivation commutative, which is what lets two racing
/// creates collide on the unique (team, name) index instead of producing two
/// channels.
pub fn direct_channel_name(user_id_a: &str, user_id_b: &str) -> String {
    if user_id_a < user_id_b {
        format!("{}__{}", user_id_a, user_id_b)
    } else {
        format!("{}__{}", user_id_b, user_id_a)
    }
}

/// Canonical group-channel name: hex digest over the sorted member-id set.
///
/// The digest keeps the name inside the 64-byte column while remaining
/// deterministic for any ordering of the same set.
pub fn group_channel_name(user_ids: &[String]) -> String {
    let mut sorted: Vec<&str> = user_ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    let mut hasher = Sha256::new();
    for (i, id) in sorted.iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(id.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(CHANNEL_NAME_MAX_LENGTH);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_name_is_commutative() {
        let a = "a".repeat(32);
        let b = "b".repeat(32);
        assert_eq!(direct_channel_name(&a, &b), direct_channel_name(&b, &a));
        assert_eq!(direct_channel_name(&a, &b), format!("{}__{}", a, b));
    }

    #[test]
    fn group_name_ignores_order_and_duplicates() {
        let ids1 = vec!["u1".to_string(), "u2".to_string(), "u3".to_string()];
        let ids2 = vec![
            "u3".to_string(),
            "u1".to_string(),
            "u2".to_string(),
            "u1".to_string(),
        ];
        assert_eq!(group_channel_name(&ids1), group_channel_name(&ids2));
        assert_eq!(group_channel_name(&ids1).len(), 64);
    }

    #[test]
    fn validation_requires_team_for_team_scoped_types() {
        let mut channel = Channel::new("", ChannelType::Open, "Town Square", "town-square");
        channel.pre_save();
        assert!(channel.is_valid().is_err());

        channel.team_id = new_id();
        assert!(channel.is_valid().is_ok());

        let mut dm = Channel::new("", ChannelType::Direct, "u1__u2", "u1__u2");
        dm.pre_save();
        assert!(dm.is_valid().is_ok());
    }

    #[test]
    fn type_tags_round_trip() {
        for t in [
            ChannelType::Open,
            ChannelType::Private,
            ChannelType::Direct,
            ChannelType::Group,
        ] {
            assert_eq!(ChannelType::from_str_tag(t.as_str()), Some(t));
        }
        assert_eq!(ChannelType::from_str_tag("X"), None);
    }
}
