//! Root configuration type and loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use super::cluster::ClusterConfig;
use super::file::FileConfig;
use super::service::ServiceConfig;
use super::sql::SqlConfig;
use super::team::TeamConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server configuration. Every section has working defaults so a minimal
/// (even empty) TOML file starts a usable single-node server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    /// HTTP service, TLS and session settings.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database settings.
    #[serde(default)]
    pub sql: SqlConfig,
    /// Team and channel limits.
    #[serde(default)]
    pub team: TeamConfig,
    /// File storage settings.
    #[serde(default)]
    pub file: FileConfig,
    /// Cluster membership settings.
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
    /// Prometheus metrics settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Email notification settings.
    #[serde(default)]
    pub email: EmailConfig,
    /// Abuse rate limits.
    #[serde(default)]
    pub rate: RateLimitConfig,
    /// Background job scheduling.
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Plugin runtime settings.
    #[serde(default)]
    pub plugin: PluginConfig,
    /// Profile field visibility.
    #[serde(default)]
    pub privacy: PrivacyConfig,
    /// Locale defaults.
    #[serde(default)]
    pub localization: LocalizationConfig,
    /// Usage statistics settings.
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogConfig {
    /// Log filter (tracing `EnvFilter` syntax). `RUST_LOG` overrides this.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricsConfig {
    /// Serve `/metrics` when true.
    #[serde(default)]
    pub enable: bool,
    /// Address the metrics endpoint binds to.
    #[serde(default = "default_metrics_address")]
    pub listen_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enable: false, listen_address: default_metrics_address() }
    }
}

fn default_metrics_address() -> SocketAddr {
    "127.0.0.1:9090".parse().unwrap_or_else(|_| unreachable!())
}

/// Email notification configuration. Delivery is fire-and-forget; failures
/// are logged and never fail the triggering operation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmailConfig {
    /// Master switch for outbound notification email. Also controls the
    /// transport probe at startup.
    #[serde(default)]
    pub send_email_notifications: bool,
}

/// Abuse rate limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimitConfig {
    /// Master switch for rate limiting.
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Sustained guest/member invites allowed per user per hour.
    #[serde(default = "default_invites_per_hour")]
    pub invites_per_hour: u32,
    /// Invite burst allowance above the sustained rate.
    #[serde(default = "default_invite_burst")]
    pub invite_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enable: true,
            invites_per_hour: default_invites_per_hour(),
            invite_burst: default_invite_burst(),
        }
    }
}

fn default_invites_per_hour() -> u32 {
    20
}

fn default_invite_burst() -> u32 {
    20
}

/// Background job configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobsConfig {
    /// Run periodic jobs on this node. The cluster leader check still
    /// applies on top of this switch.
    #[serde(default = "default_true")]
    pub run_jobs: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { run_jobs: true }
    }
}

/// Plugin runtime configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginConfig {
    /// Master switch for the plugin environment.
    #[serde(default = "default_true")]
    pub enable: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self { enable: true }
    }
}

/// Profile field visibility toward other users.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PrivacyConfig {
    #[serde(default = "default_true")]
    pub show_email_address: bool,
    #[serde(default = "default_true")]
    pub show_full_name: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self { show_email_address: true, show_full_name: true }
    }
}

/// Locale defaults handed to clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocalizationConfig {
    #[serde(default = "default_locale")]
    pub default_client_locale: String,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self { default_client_locale: default_locale() }
    }
}

fn default_locale() -> String {
    "en".to_string()
}

/// Usage statistics configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalyticsConfig {
    /// Above this many registered users, intensive analytics rows are
    /// skipped and reported as -1.
    #[serde(default = "default_max_users_for_statistics")]
    pub max_users_for_statistics: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_users_for_statistics: default_max_users_for_statistics(),
        }
    }
}

fn default_max_users_for_statistics() -> i64 {
    2500
}

pub(super) fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.rate.enable);
        assert_eq!(config.rate.invites_per_hour, 20);
        assert_eq!(config.log.level, "info");
        assert!(!config.metrics.enable);
    }

    #[test]
    fn sections_override_independently() {
        let config: Config = toml::from_str(
            r#"
            [log]
            level = "debug"
            json = true

            [metrics]
            enable = true
            listen_address = "0.0.0.0:9200"
            "#,
        )
        .unwrap();
        assert_eq!(config.log.level, "debug");
        assert!(config.log.json);
        assert!(config.metrics.enable);
        assert_eq!(config.metrics.listen_address.port(), 9200);
        // untouched sections keep defaults
        assert_eq!(config.team, TeamConfig::default());
    }

    #[test]
    fn rate_limits_deserialize() {
        let config: Config = toml::from_str(
            r#"
            [rate]
            invites_per_hour = 5
            invite_burst = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.rate.invites_per_hour, 5);
        assert_eq!(config.rate.invite_burst, 2);
    }
}
