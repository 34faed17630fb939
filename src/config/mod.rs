//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Root config struct, log/metrics/email/rate/jobs sections
//! - [`service`]: HTTP service, TLS and session configuration
//! - [`sql`]: Database configuration
//! - [`team`]: Team and channel limits
//! - [`file`]: File storage configuration
//! - [`cluster`]: Cluster membership configuration
//! - [`validation`]: Startup validation
//! - [`store`]: Live config with registered change listeners

mod cluster;
mod file;
mod service;
mod sql;
mod store;
mod team;
mod types;
mod validation;

pub use cluster::ClusterConfig;
pub use file::FileConfig;
pub use service::{ServiceConfig, TlsMinVersion, TlsSettings};
pub use sql::SqlConfig;
pub use store::{ConfigListener, ConfigStore};
pub use team::{RestrictDirectMessage, TeamConfig};
pub use types::{
    AnalyticsConfig, Config, ConfigError, EmailConfig, JobsConfig, LocalizationConfig, LogConfig,
    MetricsConfig, PluginConfig, PrivacyConfig, RateLimitConfig,
};
pub use validation::{ValidationError, validate};
