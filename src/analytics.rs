//! Server analytics reports.
//!
//! A report is a fixed, ordered list of named rows. Every database-backed
//! row is computed in its own task; each task delivers exactly one result
//! over a oneshot channel and the collector drains the receivers in row
//! order, so the report layout never depends on which query finishes first.
//! Above the configured user ceiling the table-scanning rows are skipped
//! and report `-1`.

use std::future::Future;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::model::{AnalyticsRow, ChannelType, now_millis};
use crate::server::App;

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;
const MONTH_MILLIS: i64 = 31 * DAY_MILLIS;

impl App {
    /// Builds the named report. Known reports are `standard` and
    /// `extra_counts`.
    pub async fn get_analytics(&self, report: &str) -> AppResult<Vec<AnalyticsRow>> {
        let user_count = self.store().users().count_active().await?;
        let skip_intensive = user_count > self.config().analytics.max_users_for_statistics;
        if skip_intensive {
            debug!(user_count, "user count above the statistics ceiling; skipping intensive rows");
        }

        match report {
            "standard" => self.standard_report(skip_intensive).await,
            "extra_counts" => self.extra_counts_report(skip_intensive).await,
            _ => Err(AppError::invalid_input(
                "app.analytics.get.unknown.app_error",
                "unknown analytics report",
            )
            .with_detail(format!("report={report}"))),
        }
    }

    async fn standard_report(&self, skip_intensive: bool) -> AppResult<Vec<AnalyticsRow>> {
        let now = now_millis();

        let open = self.count_task({
            let app = self.clone();
            async move { Ok(app.store().channels().count_by_type(ChannelType::Open).await?) }
        });
        let private = self.count_task({
            let app = self.clone();
            async move { Ok(app.store().channels().count_by_type(ChannelType::Private).await?) }
        });
        let posts = if skip_intensive {
            None
        } else {
            Some(self.count_task({
                let app = self.clone();
                async move { Ok(app.store().posts().count().await?) }
            }))
        };
        let users = self.count_task({
            let app = self.clone();
            async move { Ok(app.store().users().count_active().await?) }
        });
        let teams = self.count_task({
            let app = self.clone();
            async move { Ok(app.store().teams().count().await?) }
        });
        let daily = self.count_task({
            let app = self.clone();
            async move { Ok(app.store().statuses().count_active_since(now - DAY_MILLIS).await?) }
        });
        let monthly = self.count_task({
            let app = self.clone();
            async move { Ok(app.store().statuses().count_active_since(now - MONTH_MILLIS).await?) }
        });
        let inactive = self.count_task({
            let app = self.clone();
            async move { Ok(app.store().users().count_inactive().await?) }
        });

        let mut rows = Vec::with_capacity(11);
        rows.push(AnalyticsRow::new("channel_open_count", collect(open).await?));
        rows.push(AnalyticsRow::new("channel_private_count", collect(private).await?));
        rows.push(match posts {
            Some(rx) => AnalyticsRow::new("post_count", collect(rx).await?),
            None => AnalyticsRow::new("post_count", -1.0),
        });
        rows.push(AnalyticsRow::new("unique_user_count", collect(users).await?));
        rows.push(AnalyticsRow::new("team_count", collect(teams).await?));
        rows.push(AnalyticsRow::new(
            "total_websocket_connections",
            crate::metrics::ws_connection_count() as f64,
        ));
        rows.push(AnalyticsRow::new(
            "total_master_db_connections",
            self.store().pool().size() as f64,
        ));
        // SQLite has no read replicas.
        rows.push(AnalyticsRow::new("total_read_db_connections", 0.0));
        rows.push(AnalyticsRow::new("daily_active_users", collect(daily).await?));
        rows.push(AnalyticsRow::new("monthly_active_users", collect(monthly).await?));
        rows.push(AnalyticsRow::new("inactive_user_count", collect(inactive).await?));
        Ok(rows)
    }

    async fn extra_counts_report(&self, skip_intensive: bool) -> AppResult<Vec<AnalyticsRow>> {
        let file_posts = if skip_intensive {
            None
        } else {
            Some(self.count_task({
                let app = self.clone();
                async move { Ok(app.store().posts().count_with_files().await?) }
            }))
        };
        let incoming = self.count_task({
            let app = self.clone();
            async move { Ok(app.store().webhooks().count_incoming().await?) }
        });
        let outgoing = self.count_task({
            let app = self.clone();
            async move { Ok(app.store().webhooks().count_outgoing().await?) }
        });
        let sessions = self.count_task({
            let app = self.clone();
            async move { Ok(app.store().sessions().count().await?) }
        });

        let mut rows = Vec::with_capacity(4);
        rows.push(match file_posts {
            Some(rx) => AnalyticsRow::new("file_post_count", collect(rx).await?),
            None => AnalyticsRow::new("file_post_count", -1.0),
        });
        rows.push(AnalyticsRow::new("incoming_webhook_count", collect(incoming).await?));
        rows.push(AnalyticsRow::new("outgoing_webhook_count", collect(outgoing).await?));
        rows.push(AnalyticsRow::new("session_count", collect(sessions).await?));
        Ok(rows)
    }

    /// Runs one counting query on the server pool and hands back the
    /// receiver; the sender side is dropped after its single send.
    fn count_task<F>(&self, work: F) -> oneshot::Receiver<AppResult<i64>>
    where
        F: Future<Output = AppResult<i64>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.go(async move {
            let _ = tx.send(work.await);
        });
        rx
    }
}

async fn collect(rx: oneshot::Receiver<AppResult<i64>>) -> AppResult<f64> {
    let value = rx.await.map_err(|_| {
        AppError::internal(
            "app.analytics.metric.app_error",
            "analytics task dropped its result",
        )
    })??;
    Ok(value as f64)
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Channel, ChannelType, IncomingWebhook, OutgoingWebhook, Post, Session, Status, Team, User,
        new_id, now_millis,
    };
    use crate::server::App;
    use crate::server::tests::{test_config, test_server};

    async fn seed_user(app: &App, username: &str) -> User {
        let mut user = User::new(username, &format!("{username}@example.com"));
        user.pre_save();
        app.store().users().save(&user).await.unwrap();
        user
    }

    async fn seed_channel(app: &App, team_id: &str, channel_type: ChannelType) -> Channel {
        let name = new_id();
        let mut channel = Channel::new(team_id, channel_type, &name, &name);
        channel.pre_save();
        app.store().channels().save(&channel).await.unwrap();
        channel
    }

    #[tokio::test]
    async fn standard_report_keeps_a_fixed_row_order() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = Team::new("acme", "Acme");
        app.store().teams().save(&team).await.unwrap();
        let channel = seed_channel(&app, &team.id, ChannelType::Open).await;
        seed_channel(&app, &team.id, ChannelType::Private).await;
        let alice = seed_user(&app, "alice").await;
        seed_user(&app, "bob").await;
        app.create_post(Post::new(&alice.id, &channel.id, "hello"))
            .await
            .unwrap();
        let mut status = Status::new_offline(&alice.id);
        status.last_activity_at = now_millis();
        app.store().statuses().upsert(&status).await.unwrap();

        let rows = app.get_analytics("standard").await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "channel_open_count",
                "channel_private_count",
                "post_count",
                "unique_user_count",
                "team_count",
                "total_websocket_connections",
                "total_master_db_connections",
                "total_read_db_connections",
                "daily_active_users",
                "monthly_active_users",
                "inactive_user_count",
            ]
        );
        assert_eq!(rows[0].value, 1.0);
        assert_eq!(rows[1].value, 1.0);
        assert_eq!(rows[2].value, 1.0);
        assert_eq!(rows[3].value, 2.0);
        assert_eq!(rows[4].value, 1.0);
        assert_eq!(rows[8].value, 1.0);
        assert_eq!(rows[9].value, 1.0);
        assert_eq!(rows[10].value, 0.0);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn intensive_rows_collapse_above_the_user_ceiling() {
        let srv = test_server().await;
        let mut cfg = test_config();
        cfg.analytics.max_users_for_statistics = 0;
        srv.config().set(cfg);
        let app = App::new(srv.clone());

        // One registered user pushes the count over the ceiling of zero.
        seed_user(&app, "alice").await;

        let rows = app.get_analytics("standard").await.unwrap();
        assert_eq!(rows[2].name, "post_count");
        assert_eq!(rows[2].value, -1.0);
        // The cheap rows still compute.
        assert_eq!(rows[3].value, 1.0);

        let extra = app.get_analytics("extra_counts").await.unwrap();
        assert_eq!(extra[0].name, "file_post_count");
        assert_eq!(extra[0].value, -1.0);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn extra_counts_cover_attachments_hooks_and_sessions() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let team = Team::new("acme", "Acme");
        app.store().teams().save(&team).await.unwrap();
        let channel = seed_channel(&app, &team.id, ChannelType::Open).await;
        let alice = seed_user(&app, "alice").await;

        let mut with_file = Post::new(&alice.id, &channel.id, "see attachment");
        with_file.file_ids = vec![new_id()];
        app.create_post(with_file).await.unwrap();
        app.create_post(Post::new(&alice.id, &channel.id, "plain"))
            .await
            .unwrap();

        let hook = IncomingWebhook::new(&alice.id, &channel.id, &team.id);
        app.store().webhooks().save_incoming(&hook).await.unwrap();
        let dead = IncomingWebhook::new(&alice.id, &channel.id, &team.id);
        app.store().webhooks().save_incoming(&dead).await.unwrap();
        app.store()
            .webhooks()
            .delete_incoming(&dead.id, now_millis())
            .await
            .unwrap();
        let outgoing = OutgoingWebhook::new(&alice.id, &channel.id, &team.id);
        app.store().webhooks().save_outgoing(&outgoing).await.unwrap();
        app.store()
            .sessions()
            .save(&Session::new(&alice.id))
            .await
            .unwrap();

        let rows = app.get_analytics("extra_counts").await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "file_post_count",
                "incoming_webhook_count",
                "outgoing_webhook_count",
                "session_count",
            ]
        );
        assert_eq!(rows[0].value, 1.0);
        assert_eq!(rows[1].value, 1.0);
        assert_eq!(rows[2].value, 1.0);
        assert_eq!(rows[3].value, 1.0);

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_report_is_rejected() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let err = app.get_analytics("bogus").await.unwrap_err();
        assert_eq!(err.id(), "app.analytics.get.unknown.app_error");
        assert_eq!(err.http_status(), 400);

        srv.shutdown().await;
    }
}
