//! Sidebar categories: per-user, per-team channel grouping.

use serde::{Deserialize, Serialize};

use crate::model::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidebarCategoryType {
    Channels,
    DirectMessages,
    Favorites,
    Custom,
}

impl SidebarCategoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channels => "channels",
            Self::DirectMessages => "direct_messages",
            Self::Favorites => "favorites",
            Self::Custom => "custom",
        }
    }

    pub fn from_str_tag(tag: &str) -> Option<Self> {
        match tag {
            "channels" => Some(Self::Channels),
            "direct_messages" => Some(Self::DirectMessages),
            "favorites" => Some(Self::Favorites),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidebarCategory {
    pub id: String,
    pub user_id: String,
    pub team_id: String,
    pub sort_order: i64,
    #[serde(rename = "type")]
    pub category_type: SidebarCategoryType,
    pub display_name: String,
    pub muted: bool,
    pub collapsed: bool,
    /// Ordered channel ids shown under this category.
    pub channel_ids: Vec<String>,
}

impl SidebarCategory {
    pub fn new(
        user_id: &str,
        team_id: &str,
        category_type: SidebarCategoryType,
        display_name: &str,
        sort_order: i64,
    ) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.to_string(),
            team_id: team_id.to_string(),
            sort_order,
            category_type,
            display_name: display_name.to_string(),
            muted: false,
            collapsed: false,
            channel_ids: Vec::new(),
        }
    }
}

/// The three categories every (user, team) pair starts with.
pub fn default_categories(user_id: &str, team_id: &str) -> Vec<SidebarCategory> {
    vec![
        SidebarCategory::new(user_id, team_id, SidebarCategoryType::Favorites, "Favorites", 0),
        SidebarCategory::new(user_id, team_id, SidebarCategoryType::Channels, "Channels", 10),
        SidebarCategory::new(
            user_id,
            team_id,
            SidebarCategoryType::DirectMessages,
            "Direct Messages",
            20,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_ordered_favorites_first() {
        let cats = default_categories("u1", "t1");
        assert_eq!(cats.len(), 3);
        assert_eq!(cats[0].category_type, SidebarCategoryType::Favorites);
        assert_eq!(cats[1].category_type, SidebarCategoryType::Channels);
        assert_eq!(cats[2].category_type, SidebarCategoryType::DirectMessages);
        assert!(cats[0].sort_order < cats[1].sort_order);
    }

    #[test]
    fn type_tag_round_trip() {
        for t in [
            SidebarCategoryType::Channels,
            SidebarCategoryType::DirectMessages,
            SidebarCategoryType::Favorites,
            SidebarCategoryType::Custom,
        ] {
            assert_eq!(SidebarCategoryType::from_str_tag(t.as_str()), Some(t));
        }
    }
}
