//! LDAP-style user groups and their team/channel sync bindings.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::model::{new_id, now_millis};

const GROUP_NAME_MAX_LENGTH: usize = 64;
const GROUP_DISPLAY_NAME_MAX_LENGTH: usize = 128;

/// Where a group's membership is mastered.
pub const GROUP_SOURCE_LDAP: &str = "ldap";
pub const GROUP_SOURCE_CUSTOM: &str = "custom";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub source: String,
    pub remote_id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    pub allow_reference: bool,
}

impl Group {
    pub fn new(name: &str, display_name: &str, source: &str) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            name: name.to_string(),
            display_name: display_name.to_string(),
            description: String::new(),
            source: source.to_string(),
            remote_id: String::new(),
            create_at: now,
            update_at: now,
            delete_at: 0,
            allow_reference: false,
        }
    }

    pub fn pre_update(&mut self) {
        self.update_at = now_millis();
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_at > 0
    }

    pub fn is_valid(&self) -> AppResult<()> {
        if self.name.is_empty() || self.name.len() > GROUP_NAME_MAX_LENGTH {
            return Err(AppError::invalid_input(
                "model.group.is_valid.name.app_error",
                "invalid group name",
            ));
        }
        if self.display_name.is_empty()
            || self.display_name.len() > GROUP_DISPLAY_NAME_MAX_LENGTH
        {
            return Err(AppError::invalid_input(
                "model.group.is_valid.display_name.app_error",
                "invalid group display name",
            ));
        }
        if self.source != GROUP_SOURCE_LDAP && self.source != GROUP_SOURCE_CUSTOM {
            return Err(AppError::invalid_input(
                "model.group.is_valid.source.app_error",
                "invalid group source",
            ));
        }
        // LDAP groups carry the upstream DN; custom groups never do.
        if self.source == GROUP_SOURCE_LDAP && self.remote_id.is_empty() {
            return Err(AppError::invalid_input(
                "model.group.is_valid.remote_id.app_error",
                "ldap groups require a remote id",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupSyncableType {
    Team,
    Channel,
}

impl GroupSyncableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Channel => "channel",
        }
    }
}

/// Binding between a group and a team or channel. `auto_add` drives
/// membership sync; `scheme_admin` grants admin on the target to synced
/// members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSyncable {
    pub group_id: String,
    pub syncable_id: String,
    pub syncable_type: GroupSyncableType,
    pub auto_add: bool,
    pub scheme_admin: bool,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
}

impl GroupSyncable {
    pub fn new(group_id: &str, syncable_id: &str, syncable_type: GroupSyncableType) -> Self {
        let now = now_millis();
        Self {
            group_id: group_id.to_string(),
            syncable_id: syncable_id.to_string(),
            syncable_type,
            auto_add: false,
            scheme_admin: false,
            create_at: now,
            update_at: now,
            delete_at: 0,
        }
    }
}
