//! Team and channel limits.

use serde::Deserialize;

/// Who a user may open a direct channel with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictDirectMessage {
    /// Any user on the server.
    #[default]
    Any,
    /// Only users sharing at least one team.
    Team,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TeamConfig {
    /// Maximum non-deleted channels per team.
    #[serde(default = "default_max_channels_per_team")]
    pub max_channels_per_team: i64,
    /// Direct-message reachability policy.
    #[serde(default)]
    pub restrict_direct_message: RestrictDirectMessage,
    /// Channel names newcomers auto-join besides town-square. Empty means
    /// the stock off-topic; town-square is always joined either way.
    #[serde(default)]
    pub experimental_default_channels: Vec<String>,
    /// Post join/leave system messages in the default channel too.
    #[serde(default = "super::types::default_true")]
    pub enable_default_channel_leave_join_messages: bool,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            max_channels_per_team: default_max_channels_per_team(),
            restrict_direct_message: RestrictDirectMessage::Any,
            experimental_default_channels: Vec::new(),
            enable_default_channel_leave_join_messages: true,
        }
    }
}

fn default_max_channels_per_team() -> i64 {
    2000
}
