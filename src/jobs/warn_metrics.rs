//! Active-user warn metric advisories.
//!
//! Each metric owns one systems row keyed by its id. Crossing a threshold
//! trips the row and pushes `warn_metric_status_received`; dropping back
//! under it clears the row and pushes `warn_metric_status_removed`.
//! Acknowledged and run-once rows are terminal and never clear on their
//! own.

use serde_json::json;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::model::{
    SystemRow, WARN_METRIC_STATUS_ACK, WARN_METRIC_STATUS_LIMIT_REACHED,
    WARN_METRIC_STATUS_RUNONCE, WarnMetric, warn_metrics,
};
use crate::server::App;
use crate::ws::events::{EVENT_WARN_METRIC_STATUS_RECEIVED, EVENT_WARN_METRIC_STATUS_REMOVED};
use crate::ws::{Broadcast, WebSocketEvent};

enum Transition {
    Trip(&'static str),
    Clear,
    Keep,
}

fn tripped_value(metric: &WarnMetric) -> &'static str {
    if metric.is_run_once {
        WARN_METRIC_STATUS_RUNONCE
    } else {
        WARN_METRIC_STATUS_LIMIT_REACHED
    }
}

fn reconcile(metric: &WarnMetric, status: Option<&str>, active: i64) -> Transition {
    match status {
        Some(WARN_METRIC_STATUS_ACK | WARN_METRIC_STATUS_RUNONCE) => Transition::Keep,
        Some(WARN_METRIC_STATUS_LIMIT_REACHED) => {
            if active >= metric.limit {
                Transition::Keep
            } else {
                Transition::Clear
            }
        }
        // A row with an unrecognized value is rewritten or cleared as the
        // count dictates.
        Some(_) => {
            if active >= metric.limit {
                Transition::Trip(tripped_value(metric))
            } else {
                Transition::Clear
            }
        }
        None => {
            if active >= metric.limit {
                Transition::Trip(tripped_value(metric))
            } else {
                Transition::Keep
            }
        }
    }
}

/// Compares the active-user count against every registered threshold and
/// reconciles the status rows, pushing advisories for each flip. Skipped
/// entirely while the server is busy.
pub(super) async fn evaluate_warn_metrics(app: &App) -> AppResult<()> {
    if app.srv().busy().is_busy() {
        debug!("warn metric evaluation skipped while the server is busy");
        return Ok(());
    }

    let active = app.store().users().count_active().await?;
    for metric in warn_metrics() {
        let row = app.store().systems().get_optional(metric.id).await?;
        match reconcile(metric, row.as_ref().map(|r| r.value.as_str()), active) {
            Transition::Trip(value) => {
                app.store()
                    .systems()
                    .save(&SystemRow {
                        name: metric.id.to_string(),
                        value: value.to_string(),
                    })
                    .await?;
                notify_admins(app, metric).await?;
                info!(metric = metric.id, active, limit = metric.limit, "warn metric tripped");
            }
            Transition::Clear => {
                app.store().systems().delete(metric.id).await?;
                app.publish(removed_event(metric.id)).await;
                info!(metric = metric.id, active, "warn metric cleared");
            }
            Transition::Keep => {}
        }
    }
    Ok(())
}

fn removed_event(metric_id: &str) -> WebSocketEvent {
    WebSocketEvent::new(EVENT_WARN_METRIC_STATUS_REMOVED, Broadcast::all())
        .add("warn_metric_id", metric_id)
}

/// Advisories are operator-facing: each system admin gets a targeted event
/// instead of a server-wide fan-out. The store filter is a coarse LIKE, so
/// the exact role token is re-checked here.
async fn notify_admins(app: &App, metric: &WarnMetric) -> AppResult<()> {
    let admins = app.store().users().get_system_admins().await?;
    for admin in admins.iter().filter(|user| user.is_system_admin()) {
        app.publish(
            WebSocketEvent::new(
                EVENT_WARN_METRIC_STATUS_RECEIVED,
                Broadcast::to_user(&admin.id),
            )
            .add("warn_metric", json!(metric)),
        )
        .await;
    }
    Ok(())
}

impl App {
    /// Records an operator acknowledgement for `metric_id` and retires the
    /// advisory. The ack is permanent; later evaluations never revive or
    /// clear an acked row.
    pub async fn ack_warn_metric(&self, metric_id: &str) -> AppResult<()> {
        if !warn_metrics().iter().any(|m| m.id == metric_id) {
            return Err(AppError::invalid_input(
                "app.warn_metric.ack.invalid.app_error",
                "unknown warn metric",
            )
            .with_detail(format!("metric_id={metric_id}")));
        }
        self.store()
            .systems()
            .save(&SystemRow {
                name: metric_id.to_string(),
                value: WARN_METRIC_STATUS_ACK.to_string(),
            })
            .await?;
        self.publish(removed_event(metric_id)).await;
        info!(metric = metric_id, "warn metric acknowledged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SYSTEM_ADMIN_ROLE_ID, SYSTEM_USER_ROLE_ID, User};
    use crate::server::tests::test_server;

    const METRIC_100: &str = "warn_metric_number_of_active_users_100";

    fn run_once_metric() -> &'static WarnMetric {
        warn_metrics().iter().find(|m| m.is_run_once).unwrap()
    }

    #[test]
    fn reconcile_covers_every_state() {
        let metric = &warn_metrics()[0];

        assert!(matches!(
            reconcile(metric, None, metric.limit),
            Transition::Trip(WARN_METRIC_STATUS_LIMIT_REACHED)
        ));
        assert!(matches!(reconcile(metric, None, metric.limit - 1), Transition::Keep));
        assert!(matches!(
            reconcile(metric, Some(WARN_METRIC_STATUS_LIMIT_REACHED), metric.limit),
            Transition::Keep
        ));
        assert!(matches!(
            reconcile(metric, Some(WARN_METRIC_STATUS_LIMIT_REACHED), metric.limit - 1),
            Transition::Clear
        ));
        // Terminal states survive any count.
        assert!(matches!(
            reconcile(metric, Some(WARN_METRIC_STATUS_ACK), 0),
            Transition::Keep
        ));
        assert!(matches!(
            reconcile(metric, Some(WARN_METRIC_STATUS_RUNONCE), 0),
            Transition::Keep
        ));
    }

    #[test]
    fn run_once_metric_trips_into_its_terminal_state() {
        let metric = run_once_metric();
        assert!(matches!(
            reconcile(metric, None, metric.limit),
            Transition::Trip(WARN_METRIC_STATUS_RUNONCE)
        ));
    }

    async fn seed_active_users(app: &App, n: usize) {
        for i in 0..n {
            let mut user = User::new(&format!("user{i}"), &format!("user{i}@example.com"));
            user.pre_save();
            app.store().users().save(&user).await.unwrap();
        }
    }

    fn conn(
        id: &str,
        user_id: &str,
    ) -> (crate::hub::ConnHandle, tokio::sync::mpsc::Receiver<String>) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let handle = crate::hub::ConnHandle::new(
            id.to_string(),
            user_id.to_string(),
            format!("session-{id}"),
            tx,
            tokio_util::sync::CancellationToken::new(),
        );
        (handle, rx)
    }

    #[tokio::test]
    async fn crossing_and_clearing_a_threshold_flips_the_row() {
        let srv = test_server().await;
        let app = App::new(srv.clone());
        seed_active_users(&app, 99).await;

        // The hundredth active user is the admin who gets the advisory.
        let mut admin = User::new("root", "root@example.com");
        admin.roles = format!("{SYSTEM_USER_ROLE_ID} {SYSTEM_ADMIN_ROLE_ID}");
        admin.pre_save();
        app.store().users().save(&admin).await.unwrap();

        let (handle, mut admin_rx) = conn("conn1", &admin.id);
        srv.hubs().register(handle).await;
        let _hello = admin_rx.recv().await.unwrap();

        let bystander = app.store().users().get_by_username("user1").await.unwrap();
        let (handle, mut user_rx) = conn("conn2", &bystander.id);
        srv.hubs().register(handle).await;
        let _hello = user_rx.recv().await.unwrap();

        evaluate_warn_metrics(&app).await.unwrap();
        let row = app.store().systems().get(METRIC_100).await.unwrap();
        assert_eq!(row.value, WARN_METRIC_STATUS_LIMIT_REACHED);
        // The next threshold up stays unset.
        assert!(
            app.store()
                .systems()
                .get_optional("warn_metric_number_of_active_users_200")
                .await
                .unwrap()
                .is_none()
        );

        let frame: serde_json::Value =
            serde_json::from_str(&admin_rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["event"], "warn_metric_status_received");
        assert_eq!(frame["data"]["warn_metric"]["id"], METRIC_100);

        // The advisory is admin-only; re-running while still over the
        // limit is quiet for everyone.
        evaluate_warn_metrics(&app).await.unwrap();
        for rx in [&mut admin_rx, &mut user_rx] {
            assert!(
                tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv())
                    .await
                    .is_err()
            );
        }

        // One deactivation drops the count to 99 and clears the advisory
        // for every connected client.
        let victim = app.store().users().get_by_username("user0").await.unwrap();
        app.store()
            .users()
            .deactivate(&victim.id, crate::model::now_millis())
            .await
            .unwrap();
        evaluate_warn_metrics(&app).await.unwrap();
        assert!(app.store().systems().get_optional(METRIC_100).await.unwrap().is_none());

        for rx in [&mut admin_rx, &mut user_rx] {
            let frame: serde_json::Value =
                serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["event"], "warn_metric_status_removed");
            assert_eq!(frame["data"]["warn_metric_id"], METRIC_100);
        }

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn acked_metric_survives_further_evaluations() {
        let srv = test_server().await;
        let app = App::new(srv.clone());
        seed_active_users(&app, 100).await;

        evaluate_warn_metrics(&app).await.unwrap();
        app.ack_warn_metric(METRIC_100).await.unwrap();

        let row = app.store().systems().get(METRIC_100).await.unwrap();
        assert_eq!(row.value, WARN_METRIC_STATUS_ACK);

        // Still over the limit: the ack is not overwritten.
        evaluate_warn_metrics(&app).await.unwrap();
        assert_eq!(
            app.store().systems().get(METRIC_100).await.unwrap().value,
            WARN_METRIC_STATUS_ACK
        );

        // Under the limit: the ack is not cleared either.
        let victim = app.store().users().get_by_username("user0").await.unwrap();
        app.store()
            .users()
            .deactivate(&victim.id, crate::model::now_millis())
            .await
            .unwrap();
        evaluate_warn_metrics(&app).await.unwrap();
        assert_eq!(
            app.store().systems().get(METRIC_100).await.unwrap().value,
            WARN_METRIC_STATUS_ACK
        );

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_metric_ack_is_rejected() {
        let srv = test_server().await;
        let app = App::new(srv.clone());
        let err = app.ack_warn_metric("warn_metric_bogus").await.unwrap_err();
        assert_eq!(err.id(), "app.warn_metric.ack.invalid.app_error");
        srv.shutdown().await;
    }

    #[tokio::test]
    async fn busy_server_skips_evaluation() {
        let srv = test_server().await;
        let app = App::new(srv.clone());
        seed_active_users(&app, 100).await;

        srv.busy().set(30);
        evaluate_warn_metrics(&app).await.unwrap();
        assert!(app.store().systems().get_optional(METRIC_100).await.unwrap().is_none());

        srv.busy().clear();
        evaluate_warn_metrics(&app).await.unwrap();
        assert!(app.store().systems().get_optional(METRIC_100).await.unwrap().is_some());

        srv.shutdown().await;
    }
}
