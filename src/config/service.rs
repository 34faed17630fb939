//! HTTP service, TLS and session configuration.

use serde::Deserialize;
use std::net::SocketAddr;

/// HTTP service configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceConfig {
    /// Canonical base URL clients reach the server at. Used for the
    /// WebSocket origin check and in notification links.
    #[serde(default)]
    pub site_url: String,
    /// Address to bind to (e.g., "0.0.0.0:8065").
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,
    /// Local admin socket path. Serves the restricted admin commands,
    /// mode 0600, when set.
    pub unix_socket: Option<String>,
    /// Optional TLS termination.
    pub tls: Option<TlsSettings>,
    /// Extra allowed WebSocket origins besides `site_url`. `"*"` allows any.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Master switch for presence tracking and status events.
    #[serde(default = "super::types::default_true")]
    pub enable_user_statuses: bool,
    /// Allow creation and management of bot accounts.
    #[serde(default = "super::types::default_true")]
    pub enable_bot_accounts: bool,
    /// Web/desktop session lifetime in days.
    #[serde(default = "default_session_length_web")]
    pub session_length_web_days: i64,
    /// Mobile session lifetime in days.
    #[serde(default = "default_session_length_mobile")]
    pub session_length_mobile_days: i64,
    /// Minutes a session stays in the in-process cache.
    #[serde(default = "default_session_cache_minutes")]
    pub session_cache_minutes: u64,
    /// Seconds of inactivity before an online user is marked away.
    #[serde(default = "default_away_timeout")]
    pub user_status_away_timeout_secs: i64,
    /// Socket read timeout in seconds.
    #[serde(default = "default_io_timeout")]
    pub read_timeout_secs: u64,
    /// Socket write timeout in seconds.
    #[serde(default = "default_io_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            listen_address: default_listen_address(),
            unix_socket: None,
            tls: None,
            allowed_origins: Vec::new(),
            enable_user_statuses: true,
            enable_bot_accounts: true,
            session_length_web_days: default_session_length_web(),
            session_length_mobile_days: default_session_length_mobile(),
            session_cache_minutes: default_session_cache_minutes(),
            user_status_away_timeout_secs: default_away_timeout(),
            read_timeout_secs: default_io_timeout(),
            write_timeout_secs: default_io_timeout(),
        }
    }
}

fn default_listen_address() -> SocketAddr {
    "0.0.0.0:8065".parse().unwrap_or_else(|_| unreachable!())
}

fn default_session_length_web() -> i64 {
    30
}

fn default_session_length_mobile() -> i64 {
    30
}

fn default_session_cache_minutes() -> u64 {
    10
}

fn default_away_timeout() -> i64 {
    300
}

fn default_io_timeout() -> u64 {
    300
}

/// Minimum accepted TLS protocol version.
///
/// "1.0" and "1.1" are accepted in config for compatibility but the runtime
/// floor is 1.2; requesting lower logs a warning at startup and clamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TlsMinVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[default]
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
}

impl TlsMinVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
            Self::V1_2 => "1.2",
            Self::V1_3 => "1.3",
        }
    }

    /// True when the configured floor is below what the TLS stack offers.
    pub fn below_supported_floor(&self) -> bool {
        matches!(self, Self::V1_0 | Self::V1_1)
    }
}

/// TLS listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TlsSettings {
    /// Path to certificate file (PEM format).
    pub cert_path: String,
    /// Path to private key file (PEM format).
    pub key_path: String,
    /// Minimum TLS protocol version to accept.
    #[serde(default)]
    pub min_version: TlsMinVersion,
    /// Automatic certificates. Not supported; rejected at validation.
    #[serde(default)]
    pub use_lets_encrypt: bool,
    /// Answer plain HTTP on port 80 with a redirect to this listener.
    /// Requires listening on port 443.
    #[serde(default)]
    pub forward_80_to_443: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_defaults() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.listen_address.port(), 8065);
        assert!(cfg.enable_user_statuses);
        assert_eq!(cfg.user_status_away_timeout_secs, 300);
        assert_eq!(cfg.session_length_web_days, 30);
        assert!(cfg.tls.is_none());
    }

    #[test]
    fn tls_min_version_parses_dotted_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            v: TlsMinVersion,
        }
        let w: Wrapper = toml::from_str(r#"v = "1.3""#).unwrap();
        assert_eq!(w.v, TlsMinVersion::V1_3);
        let w: Wrapper = toml::from_str(r#"v = "1.1""#).unwrap();
        assert_eq!(w.v, TlsMinVersion::V1_1);
        assert!(w.v.below_supported_floor());
        assert!(!TlsMinVersion::V1_2.below_supported_floor());
    }

    #[test]
    fn tls_settings_deserialize_defaults() {
        let cfg: TlsSettings = toml::from_str(
            r#"
            cert_path = "/path/to/cert.pem"
            key_path = "/path/to/key.pem"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.min_version, TlsMinVersion::V1_2);
        assert!(!cfg.use_lets_encrypt);
        assert!(!cfg.forward_80_to_443);
    }
}
