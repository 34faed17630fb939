//! Team entity and team membership.

use serde::{Deserialize, Serialize};

use crate::model::{new_id, now_millis};

const TEAM_OPEN: &str = "O";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    pub display_name: String,
    pub name: String,
    pub description: String,
    pub email: String,
    /// "O" open, "I" invite-only.
    #[serde(rename = "type")]
    pub team_type: String,
    pub allowed_domains: String,
    pub invite_id: String,
    pub scheme_id: Option<String>,
    pub group_constrained: bool,
}

impl Team {
    pub fn new(name: &str, display_name: &str) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            create_at: now,
            update_at: now,
            delete_at: 0,
            display_name: display_name.to_string(),
            name: name.to_string(),
            description: String::new(),
            email: String::new(),
            team_type: TEAM_OPEN.to_string(),
            allowed_domains: String::new(),
            invite_id: new_id(),
            scheme_id: None,
            group_constrained: false,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_at > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub team_id: String,
    pub user_id: String,
    pub roles: String,
    pub delete_at: i64,
    pub scheme_user: bool,
    pub scheme_admin: bool,
    pub scheme_guest: bool,
}

impl TeamMember {
    pub fn new(team_id: &str, user_id: &str) -> Self {
        Self {
            team_id: team_id.to_string(),
            user_id: user_id.to_string(),
            roles: String::new(),
            delete_at: 0,
            scheme_user: true,
            scheme_admin: false,
            scheme_guest: false,
        }
    }
}
