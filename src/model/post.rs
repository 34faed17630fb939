//! Post entity. Posts are the message rows flowing through channels; the
//! system emits typed posts for joins, leaves, header changes and the rest
//! of the channel lifecycle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{new_id, now_millis};

pub const POST_MAX_MESSAGE_LEN: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostType {
    #[serde(rename = "")]
    Default,
    #[serde(rename = "system_join_channel")]
    JoinChannel,
    #[serde(rename = "system_leave_channel")]
    LeaveChannel,
    #[serde(rename = "system_add_to_channel")]
    AddToChannel,
    #[serde(rename = "system_remove_from_channel")]
    RemoveFromChannel,
    #[serde(rename = "system_header_change")]
    HeaderChange,
    #[serde(rename = "system_purpose_change")]
    PurposeChange,
    #[serde(rename = "system_displayname_change")]
    DisplayNameChange,
    #[serde(rename = "system_convert_channel")]
    ConvertChannel,
    #[serde(rename = "system_channel_deleted")]
    ChannelDeleted,
    #[serde(rename = "system_channel_restored")]
    ChannelRestored,
    #[serde(rename = "system_move_channel")]
    MoveChannel,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "",
            Self::JoinChannel => "system_join_channel",
            Self::LeaveChannel => "system_leave_channel",
            Self::AddToChannel => "system_add_to_channel",
            Self::RemoveFromChannel => "system_remove_from_channel",
            Self::HeaderChange => "system_header_change",
            Self::PurposeChange => "system_purpose_change",
            Self::DisplayNameChange => "system_displayname_change",
            Self::ConvertChannel => "system_convert_channel",
            Self::ChannelDeleted => "system_channel_deleted",
            Self::ChannelRestored => "system_channel_restored",
            Self::MoveChannel => "system_move_channel",
        }
    }

    pub fn is_system(&self) -> bool {
        !matches!(self, Self::Default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    pub user_id: String,
    pub channel_id: String,
    pub root_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub props: BTreeMap<String, serde_json::Value>,
    pub file_ids: Vec<String>,
    /// Client-chosen idempotency key for retried creates. Never persisted;
    /// the dedup cache maps it to the winning post id.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub pending_post_id: String,
}

impl Post {
    pub fn new(user_id: &str, channel_id: &str, message: &str) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            create_at: now,
            update_at: now,
            delete_at: 0,
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            root_id: String::new(),
            message: message.to_string(),
            post_type: PostType::Default,
            props: BTreeMap::new(),
            file_ids: Vec::new(),
            pending_post_id: String::new(),
        }
    }

    pub fn system(post_type: PostType, user_id: &str, channel_id: &str, message: &str) -> Self {
        let mut post = Self::new(user_id, channel_id, message);
        post.post_type = post_type;
        post
    }

    pub fn add_prop(&mut self, key: &str, value: serde_json::Value) {
        self.props.insert(key.to_string(), value);
    }

    pub fn is_valid(&self) -> bool {
        !self.user_id.is_empty()
            && !self.channel_id.is_empty()
            && self.message.len() <= POST_MAX_MESSAGE_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_posts_carry_type_tag() {
        let post = Post::system(PostType::JoinChannel, "u1", "c1", "joined");
        assert!(post.post_type.is_system());
        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["type"], "system_join_channel");
    }

    #[test]
    fn default_type_serializes_empty() {
        let post = Post::new("u1", "c1", "hello");
        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["type"], "");
    }
}
