//! The upload pipeline.
//!
//! One stream in, one durable [`FileInfo`] out. Memory stays bounded: the
//! pipeline holds at most a 1 MiB head buffer plus whatever the backend
//! buffers, regardless of upload size. The head bytes feed the image probe
//! while the full stream goes to the backend through a `limit + 1` cap, so
//! an oversized upload is caught either before reading (declared length) or
//! right after the write (actual length), in which case the written blob is
//! rolled back.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::model::FileInfo;
use crate::server::App;

use super::images;

/// Largest prefix of an upload kept in memory for probing.
const MAX_HEAD_BYTES: usize = 1024 * 1024;

/// Destination and framing for one upload.
pub struct UploadRequest {
    pub team_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub filename: String,
    /// Declared length, when the transport knows it.
    pub content_length: Option<i64>,
    /// Store the bytes as-is: no probe, no derivatives.
    pub raw: bool,
    /// Upload timestamp override; defaults to the current instant.
    pub now: Option<DateTime<Utc>>,
}

impl UploadRequest {
    pub fn new(team_id: &str, channel_id: &str, user_id: &str, filename: &str) -> Self {
        Self {
            team_id: team_id.to_string(),
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            filename: filename.to_string(),
            content_length: None,
            raw: false,
            now: None,
        }
    }
}

impl App {
    /// Ingest one file stream and return its persisted metadata.
    ///
    /// Stage order: declared-size gate, head-buffer fill, image probe,
    /// backend write, actual-size rollback, plugin intercept, derivative
    /// generation, persist, detached content extraction.
    pub async fn upload_file<R>(&self, req: UploadRequest, input: R) -> AppResult<FileInfo>
    where
        R: AsyncRead + Send + Unpin,
    {
        let start = Instant::now();
        let limit = self.config().file.max_file_size.max(0);

        if req.filename.trim().is_empty() {
            return Err(AppError::invalid_input(
                "app.file.upload_file.filename.app_error",
                "a filename is required",
            ));
        }
        if let Some(length) = req.content_length
            && length > limit
        {
            return Err(AppError::too_large(
                "app.file.upload_file.too_large.app_error",
                "file exceeds the maximum upload size",
            )
            .with_detail(format!("declared={length} max={limit}")));
        }

        let mut info = FileInfo::new(&req.user_id);
        info.set_names(&req.filename);
        let now = req.now.unwrap_or_else(Utc::now);
        info.path = format!(
            "{}/teams/{}/channels/{}/users/{}/{}/{}",
            now.format("%Y%m%d"),
            req.team_id,
            req.channel_id,
            req.user_id,
            info.id,
            info.name,
        );

        // The cap leaves one byte of slack so an upload of exactly
        // `limit + 1` bytes is distinguishable from one of `limit`.
        let mut limited = input.take(limit as u64 + 1);
        let head_capacity = match req.content_length {
            Some(length) if length >= 0 => length.min(MAX_HEAD_BYTES as i64) as usize,
            _ => MAX_HEAD_BYTES,
        };
        let mut head = Vec::new();
        (&mut limited)
            .take(head_capacity as u64)
            .read_to_end(&mut head)
            .await
            .map_err(|err| {
                AppError::internal(
                    "app.file.upload_file.read.app_error",
                    "failed to read upload stream",
                )
                .with_detail(err.to_string())
            })?;

        if !req.raw && info.is_image() {
            images::probe_image(&mut info, &head)?;
        }

        let mut combined = Cursor::new(head.as_slice()).chain(limited);
        let written = self
            .srv()
            .file_backend()
            .write_file(&mut combined, &info.path)
            .await?;
        if written > limit {
            if let Err(err) = self.srv().file_backend().remove_file(&info.path).await {
                warn!(path = %info.path, error = %err, "oversized upload left on disk");
            }
            return Err(AppError::too_large(
                "app.file.upload_file.too_large.app_error",
                "file exceeds the maximum upload size",
            )
            .with_detail(format!("size={written} max={limit}")));
        }
        info.size = written;
        drop(head);

        // Bytes as written; a plugin replacement swaps these out.
        let mut data: Option<Vec<u8>> = None;
        if self.srv().plugins().active() {
            let path = info.path.clone();
            let bytes = self.srv().file_backend().read_file(&path).await?;
            match self.srv().plugins().file_will_be_uploaded(info, &bytes).await {
                Ok(intercepted) => {
                    info = intercepted.info;
                    match intercepted.data {
                        Some(replacement) => {
                            info.size = self
                                .srv()
                                .file_backend()
                                .write_file(&mut replacement.as_slice(), &info.path)
                                .await?;
                            data = Some(replacement);
                        }
                        None => data = Some(bytes),
                    }
                }
                Err(reason) => {
                    if let Err(err) = self.srv().file_backend().remove_file(&path).await {
                        warn!(path = %path, error = %err, "rejected upload left on disk");
                    }
                    return Err(AppError::invalid_input(
                        "app.file.upload_file.rejected.app_error",
                        "upload rejected by a plugin",
                    )
                    .with_detail(reason));
                }
            }
        }

        if !req.raw && info.is_image() && !info.is_svg() {
            let bytes = match data {
                Some(bytes) => bytes,
                None => self.srv().file_backend().read_file(&info.path).await?,
            };
            self.postprocess_image(&mut info, &bytes)?;
        }

        self.store().files().save(&info).await?;
        debug!(
            file_id = %info.id,
            path = %info.path,
            size = info.size,
            "file uploaded"
        );

        if self.config().file.extract_content && !req.raw {
            let app = self.clone();
            let saved = info.clone();
            self.go(async move { app.extract_file_content(&saved).await });
        }

        crate::metrics::record_file_upload(info.size.max(0) as u64, start.elapsed().as_secs_f64());
        Ok(info)
    }

    /// Decode once, derive three JPEG renditions, and hand the thumbnail and
    /// preview writes to the task pool. Only the mini preview is awaited,
    /// because it lives inside the saved row.
    fn postprocess_image(&self, info: &mut FileInfo, bytes: &[u8]) -> AppResult<()> {
        let decoded = images::decode_upload(bytes, &info.mime_type)?;
        info.width = decoded.width();
        info.height = decoded.height();
        info.has_preview_image = true;

        let derived = images::generate_derivatives(&decoded, info.mime_type == "image/png")?;

        let (dir, filename) = match info.path.rsplit_once('/') {
            Some((dir, filename)) => (format!("{dir}/"), filename.to_string()),
            None => (String::new(), info.path.clone()),
        };
        let stem = filename
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or(filename);
        info.thumbnail_path = format!("{dir}{stem}_thumb.jpg");
        info.preview_path = format!("{dir}{stem}_preview.jpg");
        info.mini_preview = Some(derived.mini_preview);

        let backend = Arc::clone(self.srv().file_backend());
        let thumbnail_path = info.thumbnail_path.clone();
        let thumbnail = derived.thumbnail;
        self.go(async move {
            if let Err(err) = backend
                .write_file(&mut thumbnail.as_slice(), &thumbnail_path)
                .await
            {
                warn!(path = %thumbnail_path, error = %err, "thumbnail write failed");
            }
        });
        let backend = Arc::clone(self.srv().file_backend());
        let preview_path = info.preview_path.clone();
        let preview = derived.preview;
        self.go(async move {
            if let Err(err) = backend
                .write_file(&mut preview.as_slice(), &preview_path)
                .await
            {
                warn!(path = %preview_path, error = %err, "preview write failed");
            }
        });
        Ok(())
    }
}
