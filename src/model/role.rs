//! Roles, permissions and permission schemes.
//!
//! A role is a named bag of permission ids. Users and memberships carry
//! space-separated role name lists; authorization merges the permission
//! sets of every named role.

use serde::{Deserialize, Serialize};

use crate::model::{new_id, now_millis};

/// Permission ids a channel moderation scheme may selectively revoke from
/// members and guests.
pub const CHANNEL_MODERATED_PERMISSIONS: [&str; 4] = [
    "create_post",
    "create_reactions",
    "manage_members",
    "use_channel_mentions",
];

pub const CHANNEL_GUEST_ROLE_ID: &str = "channel_guest";
pub const CHANNEL_USER_ROLE_ID: &str = "channel_user";
pub const CHANNEL_ADMIN_ROLE_ID: &str = "channel_admin";

/// Whether `name` is one of the three stock channel roles.
pub fn is_built_in_channel_role(name: &str) -> bool {
    matches!(
        name,
        CHANNEL_GUEST_ROLE_ID | CHANNEL_USER_ROLE_ID | CHANNEL_ADMIN_ROLE_ID
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    pub permissions: Vec<String>,
    pub scheme_managed: bool,
    pub built_in: bool,
}

impl Role {
    pub fn new(name: &str, permissions: Vec<String>) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            name: name.to_string(),
            display_name: name.to_string(),
            description: String::new(),
            create_at: now,
            update_at: now,
            delete_at: 0,
            permissions,
            scheme_managed: false,
            built_in: false,
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemeScope {
    Team,
    Channel,
}

impl SchemeScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Channel => "channel",
        }
    }
}

/// A scheme binds override roles to a team or channel. Objects with a
/// `scheme_id` resolve member/admin/guest roles through it instead of the
/// system defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scheme {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    pub scope: SchemeScope,
    pub default_team_admin_role: String,
    pub default_team_user_role: String,
    pub default_team_guest_role: String,
    pub default_channel_admin_role: String,
    pub default_channel_user_role: String,
    pub default_channel_guest_role: String,
}

impl Scheme {
    pub fn new(name: &str, scope: SchemeScope) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            name: name.to_string(),
            display_name: name.to_string(),
            description: String::new(),
            create_at: now,
            update_at: now,
            delete_at: 0,
            scope,
            default_team_admin_role: String::new(),
            default_team_user_role: String::new(),
            default_team_guest_role: String::new(),
            default_channel_admin_role: String::new(),
            default_channel_user_role: String::new(),
            default_channel_guest_role: String::new(),
        }
    }

    pub fn is_valid_for_scope(&self) -> bool {
        match self.scope {
            SchemeScope::Channel => {
                !self.default_channel_user_role.is_empty()
                    && !self.default_channel_admin_role.is_empty()
            }
            SchemeScope::Team => {
                !self.default_team_user_role.is_empty()
                    && !self.default_team_admin_role.is_empty()
                    && !self.default_channel_user_role.is_empty()
                    && !self.default_channel_admin_role.is_empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_permission_lookup() {
        let role = Role::new(
            "channel_user",
            vec!["create_post".to_string(), "read_channel".to_string()],
        );
        assert!(role.has_permission("create_post"));
        assert!(!role.has_permission("manage_system"));
    }

    #[test]
    fn channel_scheme_needs_channel_roles_only() {
        let mut scheme = Scheme::new("mod", SchemeScope::Channel);
        assert!(!scheme.is_valid_for_scope());
        scheme.default_channel_user_role = "r1".to_string();
        scheme.default_channel_admin_role = "r2".to_string();
        assert!(scheme.is_valid_for_scope());
    }
}
