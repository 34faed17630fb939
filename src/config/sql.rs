//! Database configuration.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SqlConfig {
    /// Database driver. Only "sqlite" is supported.
    #[serde(default = "default_driver")]
    pub driver: String,
    /// SQLite database path, or ":memory:" for an in-process database.
    #[serde(default = "default_data_source")]
    pub data_source: String,
    /// Read replica sources. When non-empty, writes need a settle window
    /// before dependent reads on hot paths.
    #[serde(default)]
    pub replicas: Vec<String>,
}

impl SqlConfig {
    pub fn has_replicas(&self) -> bool {
        !self.replicas.is_empty()
    }
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            data_source: default_data_source(),
            replicas: Vec::new(),
        }
    }
}

fn default_driver() -> String {
    "sqlite".to_string()
}

fn default_data_source() -> String {
    "parleyd.db".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_replicas() {
        let cfg = SqlConfig::default();
        assert_eq!(cfg.driver, "sqlite");
        assert!(!cfg.has_replicas());
    }

    #[test]
    fn replicas_flip_the_flag() {
        let cfg: SqlConfig = toml::from_str(r#"replicas = ["replica.db"]"#).unwrap();
        assert!(cfg.has_replicas());
    }
}
