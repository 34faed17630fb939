//! Per-user sidebar categories.
//!
//! Every user gets the three stock categories (favorites, channels,
//! direct messages) per team, materialized lazily on first read. Custom
//! categories slot in after favorites; sort orders are rewritten in
//! steps of ten so inserts never collide.

use serde_json::json;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::model::{SidebarCategory, SidebarCategoryType, default_categories};
use crate::server::App;
use crate::store::StoreError;
use crate::ws::events::{
    EVENT_SIDEBAR_CATEGORY_CREATED, EVENT_SIDEBAR_CATEGORY_DELETED,
    EVENT_SIDEBAR_CATEGORY_ORDER_UPDATED, EVENT_SIDEBAR_CATEGORY_UPDATED,
};
use crate::ws::{Broadcast, WebSocketEvent};

const CATEGORY_SORT_STEP: i64 = 10;

impl App {
    /// The user's categories for a team, oldest sort order first. A user
    /// who has never touched the sidebar gets the stock set created on
    /// the spot.
    pub async fn get_sidebar_categories(
        &self,
        user_id: &str,
        team_id: &str,
    ) -> AppResult<Vec<SidebarCategory>> {
        let categories = self.store().sidebar().get_categories(user_id, team_id).await?;
        if !categories.is_empty() {
            return Ok(categories);
        }

        let defaults = default_categories(user_id, team_id);
        match self.store().sidebar().save_categories(&defaults).await {
            Ok(()) => debug!(user_id, team_id, "stock sidebar categories created"),
            // A concurrent first read already created them.
            Err(StoreError::Conflict { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        self.store()
            .sidebar()
            .get_categories(user_id, team_id)
            .await
            .map_err(Into::into)
    }

    /// Adds a custom category right below favorites and renumbers the
    /// rest.
    pub async fn create_sidebar_category(
        &self,
        user_id: &str,
        team_id: &str,
        display_name: &str,
    ) -> AppResult<SidebarCategory> {
        if display_name.is_empty() {
            return Err(AppError::invalid_input(
                "app.sidebar.create_category.name.app_error",
                "category name cannot be empty",
            ));
        }

        let existing = self.get_sidebar_categories(user_id, team_id).await?;
        let mut category = SidebarCategory::new(
            user_id,
            team_id,
            SidebarCategoryType::Custom,
            display_name,
            0,
        );

        // Favorites first, then the new category, then everything else in
        // its old order.
        let mut ordered: Vec<SidebarCategory> = Vec::with_capacity(existing.len() + 1);
        let mut inserted = false;
        for current in existing {
            let is_favorites = current.category_type == SidebarCategoryType::Favorites;
            ordered.push(current);
            if is_favorites && !inserted {
                ordered.push(category.clone());
                inserted = true;
            }
        }
        if !inserted {
            ordered.insert(0, category.clone());
        }

        self.store().sidebar().save_categories(std::slice::from_ref(&category)).await?;
        for (index, current) in ordered.iter_mut().enumerate() {
            current.sort_order = index as i64 * CATEGORY_SORT_STEP;
            self.store().sidebar().update_category(current).await?;
            if current.id == category.id {
                category.sort_order = current.sort_order;
            }
        }

        let event = WebSocketEvent::new(
            EVENT_SIDEBAR_CATEGORY_CREATED,
            Broadcast::to_user(user_id),
        )
        .add("category_id", category.id.as_str());
        self.publish(event).await;

        Ok(category)
    }

    /// Writes back edited categories (rename, mute, collapse, channel
    /// membership). Categories must already exist and belong to the user
    /// and team.
    pub async fn update_sidebar_categories(
        &self,
        user_id: &str,
        team_id: &str,
        categories: Vec<SidebarCategory>,
    ) -> AppResult<Vec<SidebarCategory>> {
        let mut updated = Vec::with_capacity(categories.len());
        for category in categories {
            if category.user_id != user_id || category.team_id != team_id {
                return Err(AppError::invalid_input(
                    "app.sidebar.update_categories.ownership.app_error",
                    "category does not belong to this user and team",
                )
                .with_detail(format!("category_id={}", category.id)));
            }
            match self.store().sidebar().update_category(&category).await {
                Ok(()) => {}
                Err(StoreError::NotFound { .. }) => {
                    return Err(AppError::not_found(
                        "app.sidebar.get_category.missing.app_error",
                        "sidebar category not found",
                    )
                    .with_detail(format!("category_id={}", category.id)));
                }
                Err(err) => return Err(err.into()),
            }
            updated.push(category);
        }

        let event = WebSocketEvent::new(
            EVENT_SIDEBAR_CATEGORY_UPDATED,
            Broadcast::to_user(user_id),
        )
        .add("updated_categories", json!(updated));
        self.publish(event).await;

        Ok(updated)
    }

    /// Reorders the categories. The id list must be exactly the user's
    /// current categories for the team, in the desired order.
    pub async fn update_sidebar_category_order(
        &self,
        user_id: &str,
        team_id: &str,
        order: Vec<String>,
    ) -> AppResult<()> {
        let mut existing = self.get_sidebar_categories(user_id, team_id).await?;

        let mut expected: Vec<&str> = existing.iter().map(|c| c.id.as_str()).collect();
        expected.sort_unstable();
        let mut given: Vec<&str> = order.iter().map(String::as_str).collect();
        given.sort_unstable();
        if expected != given {
            return Err(AppError::invalid_input(
                "app.sidebar.update_order.mismatch.app_error",
                "order must list every category exactly once",
            ));
        }

        for category in &mut existing {
            let position = order.iter().position(|id| *id == category.id).unwrap_or(0);
            category.sort_order = position as i64 * CATEGORY_SORT_STEP;
            self.store().sidebar().update_category(category).await?;
        }

        let event = WebSocketEvent::new(
            EVENT_SIDEBAR_CATEGORY_ORDER_UPDATED,
            Broadcast::to_user(user_id),
        )
        .add("order", order);
        self.publish(event).await;

        Ok(())
    }

    /// Removes a custom category. The stock categories are permanent.
    pub async fn delete_sidebar_category(
        &self,
        user_id: &str,
        team_id: &str,
        category_id: &str,
    ) -> AppResult<()> {
        let categories = self.get_sidebar_categories(user_id, team_id).await?;
        let Some(category) = categories.iter().find(|c| c.id == category_id) else {
            return Err(AppError::not_found(
                "app.sidebar.get_category.missing.app_error",
                "sidebar category not found",
            )
            .with_detail(format!("category_id={category_id}")));
        };
        if category.category_type != SidebarCategoryType::Custom {
            return Err(AppError::invalid_input(
                "app.sidebar.delete_category.stock.app_error",
                "only custom categories can be deleted",
            ));
        }

        self.store().sidebar().delete_category(category_id, user_id).await?;

        let event = WebSocketEvent::new(
            EVENT_SIDEBAR_CATEGORY_DELETED,
            Broadcast::to_user(user_id),
        )
        .add("category_id", category_id);
        self.publish(event).await;

        Ok(())
    }
}
