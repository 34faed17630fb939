//! Per-user preference rows, keyed (user, category, name).

use serde::{Deserialize, Serialize};

pub const CATEGORY_CUSTOM_STATUS: &str = "custom_status";
pub const NAME_RECENT_CUSTOM_STATUSES: &str = "recent_custom_statuses";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    pub user_id: String,
    pub category: String,
    pub name: String,
    pub value: String,
}

impl Preference {
    pub fn new(user_id: &str, category: &str, name: &str, value: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            category: category.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}
