//! Bot accounts. A bot is a user row plus an ownership row carrying the
//! managing user and lifecycle timestamps.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::model::now_millis;

const BOT_USERNAME_MAX_LENGTH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    /// Same id as the backing user row.
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub description: String,
    pub owner_id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
}

impl Bot {
    pub fn new(user_id: &str, username: &str, owner_id: &str) -> Self {
        let now = now_millis();
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            display_name: String::new(),
            description: String::new(),
            owner_id: owner_id.to_string(),
            create_at: now,
            update_at: now,
            delete_at: 0,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_at > 0
    }

    pub fn pre_update(&mut self) {
        self.update_at = now_millis();
        self.username = self.username.to_lowercase();
    }

    /// Apply a patch; absent fields keep their value.
    pub fn patch(&mut self, patch: &BotPatch) {
        if let Some(ref username) = patch.username {
            self.username = username.clone();
        }
        if let Some(ref display_name) = patch.display_name {
            self.display_name = display_name.clone();
        }
        if let Some(ref description) = patch.description {
            self.description = description.clone();
        }
    }

    pub fn is_valid(&self) -> AppResult<()> {
        if self.username.is_empty() || self.username.len() > BOT_USERNAME_MAX_LENGTH {
            return Err(AppError::invalid_input(
                "model.bot.is_valid.username.app_error",
                "invalid bot username",
            ));
        }
        if self.owner_id.is_empty() {
            return Err(AppError::invalid_input(
                "model.bot.is_valid.owner_id.app_error",
                "bot requires an owner",
            ));
        }
        Ok(())
    }
}

/// Partial bot update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotPatch {
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
}
