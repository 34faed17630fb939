//! Post repository.

use sqlx::SqlitePool;
use std::collections::BTreeMap;

use super::StoreError;
use crate::model::{Post, PostType};

type PostRow = (
    String, // id
    i64,    // create_at
    i64,    // update_at
    i64,    // delete_at
    String, // user_id
    String, // channel_id
    String, // root_id
    String, // message
    String, // post_type
    String, // props
    String, // file_ids
);

const POST_COLUMNS: &str =
    "id, create_at, update_at, delete_at, user_id, channel_id, root_id, message, post_type, \
     props, file_ids";

fn row_to_post(row: PostRow) -> Result<Post, StoreError> {
    let post_type = serde_json::from_value::<PostType>(serde_json::Value::String(row.8))?;
    let props: BTreeMap<String, serde_json::Value> = serde_json::from_str(&row.9)?;
    let file_ids: Vec<String> = serde_json::from_str(&row.10)?;
    Ok(Post {
        id: row.0,
        create_at: row.1,
        update_at: row.2,
        delete_at: row.3,
        user_id: row.4,
        channel_id: row.5,
        root_id: row.6,
        message: row.7,
        post_type,
        props,
        file_ids,
        pending_post_id: String::new(),
    })
}

pub struct PostRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PostRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, post: &Post) -> Result<(), StoreError> {
        let props = serde_json::to_string(&post.props)?;
        let file_ids = serde_json::to_string(&post.file_ids)?;
        sqlx::query(
            r#"
            INSERT INTO posts (id, create_at, update_at, delete_at, user_id, channel_id,
                               root_id, message, post_type, props, file_ids)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(post.create_at)
        .bind(post.update_at)
        .bind(post.delete_at)
        .bind(&post.user_id)
        .bind(&post.channel_id)
        .bind(&post.root_id)
        .bind(&post.message)
        .bind(post.post_type.as_str())
        .bind(&props)
        .bind(&file_ids)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("post", post.id.clone());
            }
            StoreError::from(e)
        })?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Post, StoreError> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {} FROM posts WHERE id = ?",
            POST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("post", id))?;
        row_to_post(row)
    }

    /// Latest posts in a channel, newest first.
    pub async fn get_for_channel(
        &self,
        channel_id: &str,
        limit: i64,
    ) -> Result<Vec<Post>, StoreError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {} FROM posts WHERE channel_id = ? AND delete_at = 0 \
             ORDER BY create_at DESC LIMIT ?",
            POST_COLUMNS
        ))
        .bind(channel_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(row_to_post).collect()
    }

    /// Total live posts, for analytics.
    pub async fn count(&self) -> Result<i64, StoreError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts WHERE delete_at = 0")
                .fetch_one(self.pool)
                .await?;
        Ok(count)
    }

    /// Live posts carrying at least one attachment.
    pub async fn count_with_files(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM posts WHERE delete_at = 0 AND file_ids != '[]'",
        )
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    /// Posts in a channel created strictly before `at`; this is the read
    /// cursor value that makes everything from `at` onward unread.
    pub async fn count_before(&self, channel_id: &str, at: i64) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM posts WHERE channel_id = ? AND create_at < ? AND delete_at = 0",
        )
        .bind(channel_id)
        .bind(at)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }
}
