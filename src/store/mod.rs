//! Persistent storage.
//!
//! Async SQLite access through SQLx, one repository per entity family. Row
//! reads use plain column tuples mapped by hand; JSON-bearing columns
//! (notify props, post props, file id lists) decode through serde_json.

mod bots;
mod channels;
mod cluster;
mod files;
mod groups;
mod plugin;
mod posts;
mod preferences;
mod roles;
mod sessions;
mod sidebar;
mod status;
mod system;
mod teams;
mod tokens;
mod users;
mod webhooks;

pub use bots::BotRepository;
pub use channels::ChannelRepository;
pub use cluster::{
    ClusterDiscoveryRepository, ClusterDiscoveryRow, DISCOVERY_OFFLINE_AFTER_MILLIS,
    DISCOVERY_TYPE_APP,
};
pub use files::FileInfoRepository;
pub use groups::GroupRepository;
pub use plugin::PluginKvRepository;
pub use posts::PostRepository;
pub use preferences::PreferenceRepository;
pub use roles::{RoleRepository, SchemeRepository};
pub use sessions::SessionRepository;
pub use sidebar::SidebarRepository;
pub use status::StatusRepository;
pub use system::SystemRepository;
pub use teams::TeamRepository;
pub use tokens::{TOKEN_MAX_AGE_MILLIS, Token, TokenRepository};
pub use users::UserRepository;
pub use webhooks::WebhookRepository;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::error::AppError;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("migration error: {0}")]
    Migration(sqlx::migrate::MigrateError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} already exists: {detail}")]
    Conflict { entity: &'static str, detail: String },
    #[error("column decode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub(crate) fn conflict(entity: &'static str, detail: impl Into<String>) -> Self {
        Self::Conflict { entity, detail: detail.into() }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Sqlx(err)
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, ref id } => AppError::not_found(
                "store.sql.missing.app_error",
                format!("{} not found", entity),
            )
            .with_detail(format!("id={}", id)),
            StoreError::Conflict { entity, ref detail } => AppError::conflict(
                "store.sql.exists.app_error",
                format!("{} already exists", entity),
            )
            .with_detail(detail.clone()),
            other => AppError::internal("store.sql.app_error", "database request failed")
                .with_detail(other.to_string()),
        }
    }
}

/// Storage handle with connection pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connection acquire timeout; bounds connection storms.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open the database, running migrations if needed.
    pub async fn new(data_source: &str) -> Result<Self, StoreError> {
        let pool = if data_source == ":memory:" {
            // Uniquely named shared-cache memory database per call;
            // `file::memory:` collides across parallel tests.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:parleyd-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(data_source).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(data_source)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(data_source = %data_source, "database connected");

        Self::run_migrations(&pool).await?;

        // WAL lets reads proceed while a write is in progress.
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;

        // Schema relies on ON DELETE CASCADE.
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

        sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;

        let integrity_result: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&pool)
            .await?;
        if integrity_result != "ok" {
            tracing::error!(
                integrity_check = %integrity_result,
                "database integrity check failed"
            );
            return Err(StoreError::Sqlx(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("database integrity check failed: {}", integrity_result),
            ))));
        }

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(pool).await?;
        info!("database migrations checked/applied");
        Ok(())
    }

    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    pub fn bots(&self) -> BotRepository<'_> {
        BotRepository::new(&self.pool)
    }

    pub fn sessions(&self) -> SessionRepository<'_> {
        SessionRepository::new(&self.pool)
    }

    pub fn teams(&self) -> TeamRepository<'_> {
        TeamRepository::new(&self.pool)
    }

    pub fn channels(&self) -> ChannelRepository<'_> {
        ChannelRepository::new(&self.pool)
    }

    pub fn posts(&self) -> PostRepository<'_> {
        PostRepository::new(&self.pool)
    }

    pub fn files(&self) -> FileInfoRepository<'_> {
        FileInfoRepository::new(&self.pool)
    }

    pub fn preferences(&self) -> PreferenceRepository<'_> {
        PreferenceRepository::new(&self.pool)
    }

    pub fn statuses(&self) -> StatusRepository<'_> {
        StatusRepository::new(&self.pool)
    }

    pub fn systems(&self) -> SystemRepository<'_> {
        SystemRepository::new(&self.pool)
    }

    pub fn plugin_kv(&self) -> PluginKvRepository<'_> {
        PluginKvRepository::new(&self.pool)
    }

    pub fn roles(&self) -> RoleRepository<'_> {
        RoleRepository::new(&self.pool)
    }

    pub fn schemes(&self) -> SchemeRepository<'_> {
        SchemeRepository::new(&self.pool)
    }

    pub fn groups(&self) -> GroupRepository<'_> {
        GroupRepository::new(&self.pool)
    }

    pub fn cluster(&self) -> ClusterDiscoveryRepository<'_> {
        ClusterDiscoveryRepository::new(&self.pool)
    }

    pub fn sidebar(&self) -> SidebarRepository<'_> {
        SidebarRepository::new(&self.pool)
    }

    pub fn tokens(&self) -> TokenRepository<'_> {
        TokenRepository::new(&self.pool)
    }

    pub fn webhooks(&self) -> WebhookRepository<'_> {
        WebhookRepository::new(&self.pool)
    }
}
