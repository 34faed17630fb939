//! Phone-home style advisories: the diagnostics ping, the security update
//! check and the license expiry warning. None of these ship user content;
//! the ping carries the anonymous diagnostic id and coarse counts only.

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::model::{SYSTEM_LAST_SECURITY_TIME, SystemRow, now_millis};
use crate::server::{App, SERVER_VERSION};

/// Endpoint credentials come from the environment, never the config file.
const TELEMETRY_KEY_ENV: &str = "RUDDER_KEY";
const TELEMETRY_ENDPOINT_ENV: &str = "RUDDER_DATAPLANE_URL";

const LICENSE_EXPIRY_WARNING_MILLIS: i64 = 60 * 24 * 60 * 60 * 1000;

/// Sends the periodic diagnostics snapshot. Without a telemetry key in the
/// environment there is nowhere to send it and the run is a no-op.
pub(super) async fn send_diagnostics(app: &App) -> AppResult<()> {
    let Ok(key) = std::env::var(TELEMETRY_KEY_ENV) else {
        debug!("diagnostics skipped; no telemetry key in the environment");
        return Ok(());
    };
    if key.is_empty() {
        debug!("diagnostics skipped; empty telemetry key");
        return Ok(());
    }

    let endpoint =
        std::env::var(TELEMETRY_ENDPOINT_ENV).unwrap_or_else(|_| "default".to_string());
    let report = diagnostics_report(app).await?;
    info!(endpoint = %endpoint, report = %report, "diagnostics snapshot sent");
    Ok(())
}

async fn diagnostics_report(app: &App) -> AppResult<Value> {
    let users = app.store().users().count_active().await?;
    let teams = app.store().teams().count().await?;
    let bots = app.store().bots().count().await?;
    let mut report = json!({
        "diagnostic_id": app.srv().diagnostic_id(),
        "server_version": SERVER_VERSION,
        "registered_users": users,
        "teams": teams,
        "bots": bots,
        "search_engine_active": app.srv().search().is_active(),
    });
    if let Some(cluster) = app.srv().cluster() {
        report["cluster_health_score"] = json!(cluster.health_score());
    }
    Ok(report)
}

/// Stamps the security check marker. The advisory feed itself is an
/// operator concern; the marker proves the schedule ran.
pub(super) async fn do_security_check(app: &App) -> AppResult<()> {
    let now = now_millis();
    app.store()
        .systems()
        .save(&SystemRow {
            name: SYSTEM_LAST_SECURITY_TIME.to_string(),
            value: now.to_string(),
        })
        .await?;
    debug!("security update check completed");
    Ok(())
}

/// Warns the operator log when the applied license has expired or is
/// inside the final sixty days.
pub(super) async fn check_license_expiration(app: &App) -> AppResult<()> {
    let Some(license) = app.license() else {
        return Ok(());
    };
    let remaining = license.expires_at - now_millis();
    if remaining <= 0 {
        warn!(
            customer = %license.customer_name,
            expired_at = license.expires_at,
            "license has expired; enterprise features are disabled"
        );
    } else if remaining <= LICENSE_EXPIRY_WARNING_MILLIS {
        let days = remaining / (24 * 60 * 60 * 1000);
        info!(customer = %license.customer_name, days_left = days, "license expires soon");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SYSTEM_LAST_SECURITY_TIME, Team, User};
    use crate::server::tests::test_server;

    #[tokio::test]
    async fn security_check_stamps_the_marker_row() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        assert!(
            app.store()
                .systems()
                .get_optional(SYSTEM_LAST_SECURITY_TIME)
                .await
                .unwrap()
                .is_none()
        );

        do_security_check(&app).await.unwrap();

        let row = app.store().systems().get(SYSTEM_LAST_SECURITY_TIME).await.unwrap();
        let stamped: i64 = row.value.parse().unwrap();
        assert!(stamped > 0);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn diagnostics_report_carries_the_anonymous_id_and_counts() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let mut user = User::new("alice", "alice@example.com");
        user.pre_save();
        app.store().users().save(&user).await.unwrap();
        app.store().teams().save(&Team::new("acme", "Acme")).await.unwrap();

        let report = diagnostics_report(&app).await.unwrap();
        assert_eq!(report["diagnostic_id"], srv.diagnostic_id());
        assert_eq!(report["registered_users"], 1);
        assert_eq!(report["teams"], 1);
        assert_eq!(report["bots"], 0);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn license_check_is_quiet_without_a_license() {
        let srv = test_server().await;
        let app = App::new(srv.clone());
        check_license_expiration(&app).await.unwrap();
        srv.shutdown().await;
    }
}
