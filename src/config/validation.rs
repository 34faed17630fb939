//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("service.tls.cert_path does not exist: {0}")]
    TlsCertNotFound(String),
    #[error("service.tls.key_path does not exist: {0}")]
    TlsKeyNotFound(String),
    #[error("service.tls.use_lets_encrypt is not supported")]
    LetsEncryptUnsupported,
    #[error("service.tls.forward_80_to_443 requires listen_address port 443, got {0}")]
    ForwardRequiresPort443(u16),
    #[error("service.session_length_web_days must be at least 1, got {0}")]
    InvalidWebSessionLength(i64),
    #[error("service.session_length_mobile_days must be at least 1, got {0}")]
    InvalidMobileSessionLength(i64),
    #[error("service.user_status_away_timeout_secs must be positive, got {0}")]
    InvalidAwayTimeout(i64),
    #[error("sql.driver '{0}' is not supported, expected 'sqlite'")]
    UnsupportedSqlDriver(String),
    #[error("sql.data_source parent directory does not exist: {0}")]
    DataSourcePathInvalid(String),
    #[error("file.driver '{0}' is not supported, expected 'local'")]
    UnsupportedFileDriver(String),
    #[error("file.max_file_size must be positive, got {0}")]
    InvalidMaxFileSize(i64),
    #[error("team.max_channels_per_team must be positive, got {0}")]
    InvalidMaxChannelsPerTeam(i64),
    #[error("rate.invites_per_hour must be positive when rate limiting is enabled")]
    InvalidInviteRate,
    #[error("cluster.cluster_name is required when cluster.enable is true")]
    MissingClusterName,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(ref tls) = config.service.tls {
        if tls.use_lets_encrypt {
            errors.push(ValidationError::LetsEncryptUnsupported);
        }
        if tls.forward_80_to_443 && config.service.listen_address.port() != 443 {
            errors.push(ValidationError::ForwardRequiresPort443(
                config.service.listen_address.port(),
            ));
        }
        if !Path::new(&tls.cert_path).exists() {
            errors.push(ValidationError::TlsCertNotFound(tls.cert_path.clone()));
        }
        if !Path::new(&tls.key_path).exists() {
            errors.push(ValidationError::TlsKeyNotFound(tls.key_path.clone()));
        }
    }

    if config.service.session_length_web_days < 1 {
        errors.push(ValidationError::InvalidWebSessionLength(
            config.service.session_length_web_days,
        ));
    }
    if config.service.session_length_mobile_days < 1 {
        errors.push(ValidationError::InvalidMobileSessionLength(
            config.service.session_length_mobile_days,
        ));
    }
    if config.service.user_status_away_timeout_secs <= 0 {
        errors.push(ValidationError::InvalidAwayTimeout(
            config.service.user_status_away_timeout_secs,
        ));
    }

    if config.sql.driver != "sqlite" {
        errors.push(ValidationError::UnsupportedSqlDriver(config.sql.driver.clone()));
    }
    if config.sql.data_source != ":memory:" {
        let db_path = Path::new(&config.sql.data_source);
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            errors.push(ValidationError::DataSourcePathInvalid(config.sql.data_source.clone()));
        }
    }

    if config.file.driver != "local" {
        errors.push(ValidationError::UnsupportedFileDriver(config.file.driver.clone()));
    }
    if config.file.max_file_size <= 0 {
        errors.push(ValidationError::InvalidMaxFileSize(config.file.max_file_size));
    }

    if config.team.max_channels_per_team <= 0 {
        errors.push(ValidationError::InvalidMaxChannelsPerTeam(
            config.team.max_channels_per_team,
        ));
    }

    if config.rate.enable && config.rate.invites_per_hour == 0 {
        errors.push(ValidationError::InvalidInviteRate);
    }

    if config.cluster.enable && config.cluster.cluster_name.is_empty() {
        errors.push(ValidationError::MissingClusterName);
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn lets_encrypt_rejected() {
        let config: Config = toml::from_str(
            r#"
            [service.tls]
            cert_path = "/nonexistent/cert.pem"
            key_path = "/nonexistent/key.pem"
            use_lets_encrypt = true
            "#,
        )
        .unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::LetsEncryptUnsupported)));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::TlsCertNotFound(_))));
    }

    #[test]
    fn postgres_driver_rejected() {
        let config: Config = toml::from_str(
            r#"
            [sql]
            driver = "postgres"
            "#,
        )
        .unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnsupportedSqlDriver(_))));
    }

    #[test]
    fn forward_80_needs_a_443_listener() {
        let config: Config = toml::from_str(
            r#"
            [service]
            listen_address = "0.0.0.0:8065"

            [service.tls]
            cert_path = "/nonexistent/cert.pem"
            key_path = "/nonexistent/key.pem"
            forward_80_to_443 = true
            "#,
        )
        .unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::ForwardRequiresPort443(8065)))
        );
    }

    #[test]
    fn cluster_needs_a_name() {
        let config: Config = toml::from_str(
            r#"
            [cluster]
            enable = true
            "#,
        )
        .unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingClusterName)));
    }

    #[test]
    fn memory_data_source_skips_path_check() {
        let config: Config = toml::from_str(
            r#"
            [sql]
            data_source = ":memory:"
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn zero_away_timeout_rejected() {
        let config: Config = toml::from_str(
            r#"
            [service]
            user_status_away_timeout_secs = 0
            "#,
        )
        .unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidAwayTimeout(0))));
    }
}
