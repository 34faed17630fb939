//! Analytics report rows.

use serde::{Deserialize, Serialize};

/// One named value in an analytics report.
///
/// Values are floats so a row can carry the `-1` "skipped" marker next to
/// ordinary counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRow {
    pub name: String,
    pub value: f64,
}

impl AnalyticsRow {
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}
