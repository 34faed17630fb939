//! Webhook records. Incoming webhooks post into a channel on behalf of an
//! integration; outgoing webhooks watch a channel for trigger words.
//! Command webhooks are short-lived response slots for slash commands.

use serde::{Deserialize, Serialize};

use crate::model::{new_id, now_millis};

/// Command webhooks may only be used this many times before they go dead.
pub const COMMAND_WEBHOOK_MAX_USES: i64 = 1;

/// Command webhooks expire this long after creation; the cleanup job
/// deletes anything older.
pub const COMMAND_WEBHOOK_LIFETIME_MILLIS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingWebhook {
    pub id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    pub user_id: String,
    pub channel_id: String,
    pub team_id: String,
    pub display_name: String,
    pub description: String,
}

impl IncomingWebhook {
    pub fn new(user_id: &str, channel_id: &str, team_id: &str) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            create_at: now,
            update_at: now,
            delete_at: 0,
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            team_id: team_id.to_string(),
            display_name: String::new(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingWebhook {
    pub id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    pub creator_id: String,
    /// Empty means the hook fires for every channel on the team.
    pub channel_id: String,
    pub team_id: String,
    pub display_name: String,
    pub trigger_words: Vec<String>,
    pub callback_urls: Vec<String>,
}

impl OutgoingWebhook {
    pub fn new(creator_id: &str, channel_id: &str, team_id: &str) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            create_at: now,
            update_at: now,
            delete_at: 0,
            creator_id: creator_id.to_string(),
            channel_id: channel_id.to_string(),
            team_id: team_id.to_string(),
            display_name: String::new(),
            trigger_words: Vec::new(),
            callback_urls: Vec::new(),
        }
    }
}

/// One-shot response slot handed to a slash-command integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandWebhook {
    pub id: String,
    pub create_at: i64,
    pub command_id: String,
    pub user_id: String,
    pub channel_id: String,
    pub root_id: String,
    pub use_count: i64,
}

impl CommandWebhook {
    pub fn new(command_id: &str, user_id: &str, channel_id: &str) -> Self {
        Self {
            id: new_id(),
            create_at: now_millis(),
            command_id: command_id.to_string(),
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            root_id: String::new(),
            use_count: 0,
        }
    }
}
