//! Sidebar category repository.

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::{SidebarCategory, SidebarCategoryType};

type CategoryRow = (String, String, String, i64, String, String, bool, bool);

const CATEGORY_COLUMNS: &str =
    "id, user_id, team_id, sort_order, category_type, display_name, muted, collapsed";

fn row_to_category(row: CategoryRow) -> Result<SidebarCategory, StoreError> {
    let category_type = SidebarCategoryType::from_str_tag(&row.4)
        .ok_or_else(|| StoreError::not_found("sidebar category type", row.4.clone()))?;
    Ok(SidebarCategory {
        id: row.0,
        user_id: row.1,
        team_id: row.2,
        sort_order: row.3,
        category_type,
        display_name: row.5,
        muted: row.6,
        collapsed: row.7,
        channel_ids: Vec::new(),
    })
}

pub struct SidebarRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SidebarRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert categories with their channel lists. Duplicate (user, team,
    /// type, name) rows conflict; racing default-category creation treats
    /// that as already-done.
    pub async fn save_categories(
        &self,
        categories: &[SidebarCategory],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for category in categories {
            sqlx::query(
                r#"
                INSERT INTO sidebar_categories (id, user_id, team_id, sort_order,
                                                category_type, display_name, muted, collapsed)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&category.id)
            .bind(&category.user_id)
            .bind(&category.team_id)
            .bind(category.sort_order)
            .bind(category.category_type.as_str())
            .bind(&category.display_name)
            .bind(category.muted)
            .bind(category.collapsed)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return StoreError::conflict("sidebar category", category.display_name.clone());
                }
                StoreError::from(e)
            })?;
            for (order, channel_id) in category.channel_ids.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO sidebar_channels (channel_id, user_id, category_id, sort_order)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(channel_id)
                .bind(&category.user_id)
                .bind(&category.id)
                .bind(order as i64 * 10)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Categories for a (user, team) pair with channel lists populated,
    /// ordered by sort order.
    pub async fn get_categories(
        &self,
        user_id: &str,
        team_id: &str,
    ) -> Result<Vec<SidebarCategory>, StoreError> {
        let rows = sqlx::query_as::<_, CategoryRow>(&format!(
            "SELECT {} FROM sidebar_categories WHERE user_id = ? AND team_id = ? \
             ORDER BY sort_order",
            CATEGORY_COLUMNS
        ))
        .bind(user_id)
        .bind(team_id)
        .fetch_all(self.pool)
        .await?;
        let mut categories = rows
            .into_iter()
            .map(row_to_category)
            .collect::<Result<Vec<_>, _>>()?;
        for category in &mut categories {
            category.channel_ids = sqlx::query_scalar::<_, String>(
                "SELECT channel_id FROM sidebar_channels WHERE category_id = ? ORDER BY sort_order",
            )
            .bind(&category.id)
            .fetch_all(self.pool)
            .await?;
        }
        Ok(categories)
    }

    pub async fn update_category(&self, category: &SidebarCategory) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE sidebar_categories
            SET sort_order = ?, display_name = ?, muted = ?, collapsed = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(category.sort_order)
        .bind(&category.display_name)
        .bind(category.muted)
        .bind(category.collapsed)
        .bind(&category.id)
        .bind(&category.user_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("sidebar category", category.id.clone()));
        }
        sqlx::query("DELETE FROM sidebar_channels WHERE category_id = ?")
            .bind(&category.id)
            .execute(&mut *tx)
            .await?;
        for (order, channel_id) in category.channel_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO sidebar_channels (channel_id, user_id, category_id, sort_order) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(channel_id)
            .bind(&category.user_id)
            .bind(&category.id)
            .bind(order as i64 * 10)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_category(&self, category_id: &str, user_id: &str) -> Result<(), StoreError> {
        let result =
            sqlx::query("DELETE FROM sidebar_categories WHERE id = ? AND user_id = ?")
                .bind(category_id)
                .bind(user_id)
                .execute(self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("sidebar category", category_id));
        }
        Ok(())
    }

    /// Drop a channel from every category the user placed it in.
    pub async fn remove_channel_for_user(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sidebar_channels WHERE user_id = ? AND channel_id = ?")
            .bind(user_id)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}
