//! File metadata repository.

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::FileInfo;

// content and mini_preview stay out of the row tuple; extracted text is
// refetched on demand.
type FileRow = (
    String, // id
    String, // creator_id
    String, // post_id
    i64,    // create_at
    i64,    // update_at
    i64,    // delete_at
    String, // path
    String, // thumbnail_path
    String, // preview_path
    String, // name
    String, // extension
    i64,    // size
    String, // mime_type
    i64,    // width
    i64,    // height
    bool,   // has_preview_image
);

const FILE_COLUMNS: &str = "id, creator_id, post_id, create_at, update_at, delete_at, path, \
     thumbnail_path, preview_path, name, extension, size, mime_type, width, height, \
     has_preview_image";

fn row_to_file(row: FileRow) -> FileInfo {
    FileInfo {
        id: row.0,
        creator_id: row.1,
        post_id: row.2,
        create_at: row.3,
        update_at: row.4,
        delete_at: row.5,
        path: row.6,
        thumbnail_path: row.7,
        preview_path: row.8,
        name: row.9,
        extension: row.10,
        size: row.11,
        mime_type: row.12,
        width: row.13.max(0) as u32,
        height: row.14.max(0) as u32,
        has_preview_image: row.15,
        content: String::new(),
        mini_preview: None,
    }
}

pub struct FileInfoRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> FileInfoRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, info: &FileInfo) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO file_info (id, creator_id, post_id, create_at, update_at, delete_at,
                                   path, thumbnail_path, preview_path, name, extension, size,
                                   mime_type, width, height, has_preview_image, content,
                                   mini_preview)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&info.id)
        .bind(&info.creator_id)
        .bind(&info.post_id)
        .bind(info.create_at)
        .bind(info.update_at)
        .bind(info.delete_at)
        .bind(&info.path)
        .bind(&info.thumbnail_path)
        .bind(&info.preview_path)
        .bind(&info.name)
        .bind(&info.extension)
        .bind(info.size)
        .bind(&info.mime_type)
        .bind(info.width as i64)
        .bind(info.height as i64)
        .bind(info.has_preview_image)
        .bind(&info.content)
        .bind(&info.mini_preview)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("file info", info.id.clone());
            }
            StoreError::from(e)
        })?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<FileInfo, StoreError> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM file_info WHERE id = ? AND delete_at = 0",
            FILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("file info", id))?;
        Ok(row_to_file(row))
    }

    /// Attach extracted document text after the fact.
    pub async fn set_content(&self, id: &str, content: &str, now: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE file_info SET content = ?, update_at = ? WHERE id = ?")
            .bind(content)
            .bind(now)
            .bind(id)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("file info", id));
        }
        Ok(())
    }

    pub async fn get_content(&self, id: &str) -> Result<String, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT content FROM file_info WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("file info", id))
    }
}
