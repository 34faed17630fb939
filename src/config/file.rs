//! File storage configuration.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileConfig {
    /// Storage driver. Only "local" is supported.
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Root directory for the local driver.
    #[serde(default = "default_directory")]
    pub directory: String,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: i64,
    /// Extract searchable text from uploaded documents.
    #[serde(default = "super::types::default_true")]
    pub extract_content: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            directory: default_directory(),
            max_file_size: default_max_file_size(),
            extract_content: true,
        }
    }
}

fn default_driver() -> String {
    "local".to_string()
}

fn default_directory() -> String {
    "./data".to_string()
}

fn default_max_file_size() -> i64 {
    50 * 1024 * 1024
}
