//! System key/value rows and warn metrics.

use serde::{Deserialize, Serialize};

pub const SYSTEM_DIAGNOSTIC_ID: &str = "DiagnosticId";
pub const SYSTEM_ASYMMETRIC_SIGNING_KEY: &str = "AsymmetricSigningKey";
pub const SYSTEM_POST_ACTION_COOKIE_SECRET: &str = "PostActionCookieSecret";
pub const SYSTEM_INSTALLATION_DATE: &str = "InstallationDate";
pub const SYSTEM_FIRST_SERVER_RUN_TIMESTAMP: &str = "FirstServerRunTimestamp";
/// Epoch millis of the last completed security update check.
pub const SYSTEM_LAST_SECURITY_TIME: &str = "LastSecurityTime";
/// JSON of the applied license, if any.
pub const SYSTEM_ACTIVE_LICENSE: &str = "ActiveLicense";

/// One row of the systems table: server-scoped state not tied to any user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemRow {
    pub name: String,
    pub value: String,
}

pub const WARN_METRIC_PREFIX: &str = "warn_metric_";
pub const WARN_METRIC_STATUS_RUNONCE: &str = "runonce";
pub const WARN_METRIC_STATUS_LIMIT_REACHED: &str = "true";
pub const WARN_METRIC_STATUS_ACK: &str = "ack";

/// A registered-user growth threshold that trips an admin advisory once
/// crossed. Status rows live in the systems table under the metric id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WarnMetric {
    pub id: &'static str,
    pub limit: i64,
    /// Whether the advisory fires a single time and never clears on its
    /// own; only an acknowledgement retires it.
    pub is_run_once: bool,
}

pub fn warn_metrics() -> &'static [WarnMetric] {
    &[
        WarnMetric { id: "warn_metric_number_of_active_users_100", limit: 100, is_run_once: false },
        WarnMetric { id: "warn_metric_number_of_active_users_200", limit: 200, is_run_once: false },
        WarnMetric { id: "warn_metric_number_of_active_users_300", limit: 300, is_run_once: false },
        WarnMetric { id: "warn_metric_number_of_active_users_500", limit: 500, is_run_once: true },
    ]
}
