//! File storage drivers.
//!
//! Uploads, derived images, and bot icons all go through [`FileBackend`]
//! instead of touching the filesystem directly, so tests and future drivers
//! can swap storage without reaching into the upload pipeline. The only
//! driver shipped today is [`LocalFileBackend`].

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{self, AsyncRead, AsyncWriteExt};

use crate::error::{AppError, AppResult};

/// Storage capability used by the upload pipeline.
///
/// Paths are relative, `/`-separated, and interpreted under the driver's
/// root. `write_file` and `append_file` consume a stream so the caller can
/// bound its own memory; both return the number of bytes written.
#[async_trait]
pub trait FileBackend: Send + Sync {
    async fn write_file(
        &self,
        rd: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> AppResult<i64>;

    /// Append to an existing file. Fails if the file is absent.
    async fn append_file(
        &self,
        rd: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> AppResult<i64>;

    async fn read_file(&self, path: &str) -> AppResult<Vec<u8>>;

    async fn file_exists(&self, path: &str) -> AppResult<bool>;

    async fn file_size(&self, path: &str) -> AppResult<i64>;

    /// Immediate children of `path`, each joined back onto `path`.
    async fn list_directory(&self, path: &str) -> AppResult<Vec<String>>;

    async fn remove_file(&self, path: &str) -> AppResult<()>;

    async fn move_file(&self, old_path: &str, new_path: &str) -> AppResult<()>;
}

/// Local-filesystem driver rooted at `file.directory`.
pub struct LocalFileBackend {
    root: PathBuf,
}

impl LocalFileBackend {
    pub fn new(directory: &str) -> Self {
        Self {
            root: PathBuf::from(directory),
        }
    }

    /// Join `path` under the root, rejecting anything that could escape it.
    fn resolve(&self, path: &str) -> AppResult<PathBuf> {
        let rel = Path::new(path);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if escapes {
            return Err(AppError::invalid_input(
                "app.file.path.escape.app_error",
                "file path escapes the storage root",
            )
            .with_detail(path.to_string()));
        }
        Ok(self.root.join(rel))
    }

    async fn ensure_parent(&self, full: &Path) -> AppResult<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(|err| {
                AppError::internal(
                    "app.file.write_file.mkdir.app_error",
                    "unable to create storage directory",
                )
                .with_detail(format!("{}: {err}", parent.display()))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl FileBackend for LocalFileBackend {
    async fn write_file(
        &self,
        rd: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> AppResult<i64> {
        let full = self.resolve(path)?;
        self.ensure_parent(&full).await?;
        let mut file = fs::File::create(&full).await.map_err(|err| {
            AppError::internal("app.file.write_file.io.app_error", "unable to write file")
                .with_detail(format!("{path}: {err}"))
        })?;
        let written = io::copy(rd, &mut file).await.map_err(|err| {
            AppError::internal("app.file.write_file.io.app_error", "unable to write file")
                .with_detail(format!("{path}: {err}"))
        })?;
        file.flush().await.map_err(|err| {
            AppError::internal("app.file.write_file.io.app_error", "unable to flush file")
                .with_detail(format!("{path}: {err}"))
        })?;
        Ok(written as i64)
    }

    async fn append_file(
        &self,
        rd: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> AppResult<i64> {
        let full = self.resolve(path)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&full)
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => AppError::not_found(
                    "app.file.append_file.missing.app_error",
                    "file to append to does not exist",
                )
                .with_detail(path.to_string()),
                _ => AppError::internal(
                    "app.file.append_file.io.app_error",
                    "unable to append to file",
                )
                .with_detail(format!("{path}: {err}")),
            })?;
        let written = io::copy(rd, &mut file).await.map_err(|err| {
            AppError::internal("app.file.append_file.io.app_error", "unable to append to file")
                .with_detail(format!("{path}: {err}"))
        })?;
        file.flush().await.map_err(|err| {
            AppError::internal("app.file.append_file.io.app_error", "unable to flush file")
                .with_detail(format!("{path}: {err}"))
        })?;
        Ok(written as i64)
    }

    async fn read_file(&self, path: &str) -> AppResult<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).await.map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => AppError::not_found(
                "app.file.read_file.missing.app_error",
                "file does not exist",
            )
            .with_detail(path.to_string()),
            _ => AppError::internal("app.file.read_file.io.app_error", "unable to read file")
                .with_detail(format!("{path}: {err}")),
        })
    }

    async fn file_exists(&self, path: &str) -> AppResult<bool> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(AppError::internal(
                "app.file.file_exists.io.app_error",
                "unable to stat file",
            )
            .with_detail(format!("{path}: {err}"))),
        }
    }

    async fn file_size(&self, path: &str) -> AppResult<i64> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).await.map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => AppError::not_found(
                "app.file.file_size.missing.app_error",
                "file does not exist",
            )
            .with_detail(path.to_string()),
            _ => AppError::internal("app.file.file_size.io.app_error", "unable to stat file")
                .with_detail(format!("{path}: {err}")),
        })?;
        Ok(meta.len() as i64)
    }

    async fn list_directory(&self, path: &str) -> AppResult<Vec<String>> {
        let full = self.resolve(path)?;
        let mut dir = fs::read_dir(&full).await.map_err(|err| {
            AppError::internal(
                "app.file.list_directory.io.app_error",
                "unable to list directory",
            )
            .with_detail(format!("{path}: {err}"))
        })?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|err| {
            AppError::internal(
                "app.file.list_directory.io.app_error",
                "unable to list directory",
            )
            .with_detail(format!("{path}: {err}"))
        })? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_empty() {
                entries.push(name);
            } else {
                entries.push(format!("{}/{}", path.trim_end_matches('/'), name));
            }
        }
        entries.sort_unstable();
        Ok(entries)
    }

    async fn remove_file(&self, path: &str) -> AppResult<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).await.map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => AppError::not_found(
                "app.file.remove_file.missing.app_error",
                "file does not exist",
            )
            .with_detail(path.to_string()),
            _ => AppError::internal("app.file.remove_file.io.app_error", "unable to remove file")
                .with_detail(format!("{path}: {err}")),
        })
    }

    async fn move_file(&self, old_path: &str, new_path: &str) -> AppResult<()> {
        let old_full = self.resolve(old_path)?;
        let new_full = self.resolve(new_path)?;
        self.ensure_parent(&new_full).await?;
        fs::rename(&old_full, &new_full).await.map_err(|err| {
            AppError::internal("app.file.move_file.io.app_error", "unable to move file")
                .with_detail(format!("{old_path} -> {new_path}: {err}"))
        })
    }
}
