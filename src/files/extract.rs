//! Post-upload text extraction.
//!
//! Runs detached from the upload response. Extraction is best effort: on
//! any failure the file simply stays unsearchable.

use tracing::{debug, warn};

use crate::model::{now_millis, FileInfo};
use crate::server::App;

/// Extraction reads at most this much of the blob.
const MAX_EXTRACT_BYTES: usize = 1024 * 1024;

/// Mime types whose bytes are their own text.
fn extractable(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json" | "application/xml" | "application/javascript"
        )
}

impl App {
    /// Attaches searchable text to an uploaded document, capped at 1 MiB.
    pub(crate) async fn extract_file_content(&self, info: &FileInfo) {
        if !extractable(&info.mime_type) {
            return;
        }
        let bytes = match self.srv().file_backend().read_file(&info.path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(file_id = %info.id, error = %err, "content extraction read failed");
                return;
            }
        };
        let capped = &bytes[..bytes.len().min(MAX_EXTRACT_BYTES)];
        // NUL bytes do not survive the text column.
        let text = String::from_utf8_lossy(capped).replace('\u{0}', "");
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Err(err) = self
            .store()
            .files()
            .set_content(&info.id, text, now_millis())
            .await
        {
            warn!(file_id = %info.id, error = %err, "content extraction save failed");
            return;
        }
        debug!(file_id = %info.id, bytes = text.len(), "extracted document text");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_like_mimes_are_extractable() {
        assert!(extractable("text/plain"));
        assert!(extractable("text/markdown"));
        assert!(extractable("application/json"));
        assert!(!extractable("image/png"));
        assert!(!extractable("application/zip"));
    }
}
