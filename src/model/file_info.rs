//! File metadata rows produced by the upload pipeline.

use serde::{Deserialize, Serialize};

use crate::model::{new_id, now_millis};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub creator_id: String,
    pub post_id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    /// Backend-relative path of the stored original.
    pub path: String,
    pub thumbnail_path: String,
    pub preview_path: String,
    pub name: String,
    pub extension: String,
    pub size: i64,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub has_preview_image: bool,
    /// Extracted document text; feeds search, never serialized to clients.
    #[serde(skip)]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mini_preview: Option<Vec<u8>>,
}

impl FileInfo {
    pub fn new(creator_id: &str) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            creator_id: creator_id.to_string(),
            create_at: now,
            update_at: now,
            ..Default::default()
        }
    }

    /// Derive name, extension and mime type from a client-supplied filename.
    pub fn set_names(&mut self, filename: &str) {
        self.name = filename.to_string();
        self.extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        self.mime_type = mime_from_extension(&self.extension).to_string();
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_svg(&self) -> bool {
        self.mime_type == "image/svg+xml"
    }
}

fn mime_from_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_derive_extension_and_mime() {
        let mut info = FileInfo::new("u1");
        info.set_names("Report.Final.PNG");
        assert_eq!(info.extension, "png");
        assert_eq!(info.mime_type, "image/png");
        assert!(info.is_image());
        assert!(!info.is_svg());
    }

    #[test]
    fn no_extension_means_octet_stream() {
        let mut info = FileInfo::new("u1");
        info.set_names("README");
        assert_eq!(info.extension, "");
        assert_eq!(info.mime_type, "application/octet-stream");
    }

    #[test]
    fn svg_detected() {
        let mut info = FileInfo::new("u1");
        info.set_names("logo.svg");
        assert!(info.is_svg());
        assert!(info.is_image());
    }
}
