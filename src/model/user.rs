//! User entity.

use crate::error::{AppError, AppResult};
use crate::model::status::CustomStatus;
use crate::model::{is_valid_id, new_id, now_millis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const USERNAME_MAX_LENGTH: usize = 64;
const EMAIL_MAX_LENGTH: usize = 128;

/// System-level role names attached to a user row.
pub const SYSTEM_USER_ROLE_ID: &str = "system_user";
pub const SYSTEM_GUEST_ROLE_ID: &str = "system_guest";
pub const SYSTEM_ADMIN_ROLE_ID: &str = "system_admin";

/// A user account. Bots wrap a user row with `is_bot` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    pub username: String,
    pub email: String,
    pub nickname: String,
    pub first_name: String,
    pub last_name: String,
    /// Space-separated system role names.
    pub roles: String,
    pub locale: String,
    /// Notification preferences, persisted as a JSON object.
    pub notify_props: BTreeMap<String, String>,
    pub is_bot: bool,
    pub last_picture_update: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<CustomStatus>,
}

impl User {
    pub fn new(username: &str, email: &str) -> Self {
        Self {
            id: new_id(),
            create_at: 0,
            update_at: 0,
            delete_at: 0,
            username: username.to_string(),
            email: email.to_string(),
            nickname: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            roles: SYSTEM_USER_ROLE_ID.to_string(),
            locale: "en".to_string(),
            notify_props: BTreeMap::new(),
            is_bot: false,
            last_picture_update: 0,
            custom_status: None,
        }
    }

    pub fn pre_save(&mut self) {
        if self.id.is_empty() {
            self.id = new_id();
        }
        let now = now_millis();
        self.create_at = now;
        self.update_at = now;
        self.username = self.username.to_lowercase();
        self.email = self.email.to_lowercase();
    }

    pub fn pre_update(&mut self) {
        self.update_at = now_millis();
        self.username = self.username.to_lowercase();
        self.email = self.email.to_lowercase();
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_at > 0
    }

    pub fn is_guest(&self) -> bool {
        self.roles
            .split_whitespace()
            .any(|r| r == SYSTEM_GUEST_ROLE_ID)
    }

    pub fn is_system_admin(&self) -> bool {
        self.roles
            .split_whitespace()
            .any(|r| r == SYSTEM_ADMIN_ROLE_ID)
    }

    /// Display name preference: nickname, then full name, then username.
    pub fn display_name(&self) -> String {
        if !self.nickname.is_empty() {
            return self.nickname.clone();
        }
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        self.username.clone()
    }

    /// Blank fields other users are not allowed to see before this profile
    /// goes out over the wire. Notification preferences never leave the
    /// owning user's own responses.
    pub fn sanitize(&mut self, show_email: bool, show_full_name: bool) {
        if !show_email {
            self.email.clear();
        }
        if !show_full_name {
            self.first_name.clear();
            self.last_name.clear();
            self.nickname.clear();
        }
        self.notify_props.clear();
    }

    pub fn is_valid(&self) -> AppResult<()> {
        if !is_valid_id(&self.id) {
            return Err(AppError::invalid_input(
                "model.user.is_valid.id.app_error",
                "invalid user id",
            ));
        }
        if self.username.is_empty() || self.username.len() > USERNAME_MAX_LENGTH {
            return Err(AppError::invalid_input(
                "model.user.is_valid.username.app_error",
                "invalid username",
            ));
        }
        if self.email.is_empty() || self.email.len() > EMAIL_MAX_LENGTH {
            return Err(AppError::invalid_input(
                "model.user.is_valid.email.app_error",
                "invalid email",
            ));
        }
        Ok(())
    }
}
