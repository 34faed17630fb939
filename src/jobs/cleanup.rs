//! Reaping jobs: tokens, command webhooks, plugin KV rows and sessions.

use tracing::{debug, info};

use crate::error::AppResult;
use crate::model::{SESSION_CLEANUP_BATCH_SIZE, now_millis};
use crate::push::{PUSH_TYPE_SESSION_EXPIRED, PushNotification};
use crate::server::App;

/// Sessions that expired within this trailing window are still owed their
/// expiry push; anything older is just reaped.
const SESSION_EXPIRY_NOTIFY_WINDOW_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Drops invite and verification tokens past their lifetime.
pub(super) async fn cleanup_tokens(app: &App) -> AppResult<()> {
    let removed = app.store().tokens().cleanup(now_millis()).await?;
    if removed > 0 {
        info!(removed, "expired tokens removed");
    }
    Ok(())
}

/// Drops single-use command webhooks past their lifetime.
pub(super) async fn cleanup_command_webhooks(app: &App) -> AppResult<()> {
    let removed = app
        .store()
        .webhooks()
        .cleanup_command_webhooks(now_millis())
        .await?;
    if removed > 0 {
        info!(removed, "stale command webhooks removed");
    }
    Ok(())
}

/// Drops plugin KV rows whose TTL has passed.
pub(super) async fn cleanup_plugin_kv(app: &App) -> AppResult<()> {
    let removed = app.srv().plugins().kv().delete_all_expired().await?;
    if removed > 0 {
        info!(removed, "expired plugin kv rows removed");
    }
    Ok(())
}

/// Notifies freshly expired sessions, then reaps expired rows in batches
/// and sweeps the session cache.
///
/// The `expired_notify` flag makes the push at-most-once per session: it
/// is written before the reap, so a pass that fails partway through never
/// pushes the same session twice on retry.
pub(super) async fn cleanup_sessions(app: &App) -> AppResult<()> {
    let now = now_millis();
    let sessions = app
        .store()
        .sessions()
        .get_expired_unnotified(now, SESSION_EXPIRY_NOTIFY_WINDOW_MILLIS)
        .await?;
    for session in &sessions {
        if session.is_mobile() {
            app.srv().push().send(PushNotification::new(
                &session.user_id,
                PUSH_TYPE_SESSION_EXPIRED,
                "Your session has expired. Log in to keep receiving notifications.",
            ));
        }
        app.store()
            .sessions()
            .update_expired_notify(&session.id, true)
            .await?;
        app.srv().session_cache().invalidate(&session.token);
    }
    if !sessions.is_empty() {
        debug!(notified = sessions.len(), "expired sessions processed");
    }

    let mut reaped: u64 = 0;
    loop {
        let removed = app
            .store()
            .sessions()
            .cleanup_expired(now, SESSION_CLEANUP_BATCH_SIZE)
            .await?;
        reaped += removed;
        if removed < SESSION_CLEANUP_BATCH_SIZE as u64 {
            break;
        }
    }
    let swept = app.srv().session_cache().sweep();
    if reaped > 0 || swept > 0 {
        info!(reaped, swept, "session cleanup finished");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::config::ConfigStore;
    use crate::model::Session;
    use crate::push::PushProvider;
    use crate::server::tests::{test_config, test_server};
    use crate::server::{Server, ServerOptions};
    use crate::store::{TOKEN_MAX_AGE_MILLIS, Token};

    #[derive(Default)]
    struct CountingProvider {
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl PushProvider for CountingProvider {
        async fn send(&self, _notification: &PushNotification) -> AppResult<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn old_tokens_are_reaped_and_fresh_ones_kept() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let fresh = Token::new("team_invitation", String::new());
        app.store().tokens().save(&fresh).await.unwrap();
        let stale = Token {
            create_at: now_millis() - TOKEN_MAX_AGE_MILLIS - 1000,
            ..Token::new("team_invitation", String::new())
        };
        app.store().tokens().save(&stale).await.unwrap();

        cleanup_tokens(&app).await.unwrap();

        assert!(app.store().tokens().get(&fresh.token).await.is_ok());
        assert!(app.store().tokens().get(&stale.token).await.is_err());

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn command_webhooks_are_single_use_and_reaped_after_expiry() {
        use crate::model::{
            COMMAND_WEBHOOK_LIFETIME_MILLIS, COMMAND_WEBHOOK_MAX_USES, CommandWebhook,
        };

        let srv = test_server().await;
        let app = App::new(srv.clone());

        let fresh = CommandWebhook::new("cmd1", "u1", "c1");
        app.store().webhooks().save_command_webhook(&fresh).await.unwrap();
        let stale = CommandWebhook {
            create_at: now_millis() - COMMAND_WEBHOOK_LIFETIME_MILLIS - 1000,
            ..CommandWebhook::new("cmd2", "u1", "c1")
        };
        app.store().webhooks().save_command_webhook(&stale).await.unwrap();

        // One use succeeds, the second claim on the same slot fails.
        let used = app
            .store()
            .webhooks()
            .try_use_command_webhook(&fresh.id, COMMAND_WEBHOOK_MAX_USES, now_millis())
            .await
            .unwrap();
        assert_eq!(used.use_count, 1);
        assert!(
            app.store()
                .webhooks()
                .try_use_command_webhook(&fresh.id, COMMAND_WEBHOOK_MAX_USES, now_millis())
                .await
                .is_err()
        );

        // A hook past its lifetime cannot be claimed at all.
        assert!(
            app.store()
                .webhooks()
                .try_use_command_webhook(&stale.id, COMMAND_WEBHOOK_MAX_USES, now_millis())
                .await
                .is_err()
        );

        cleanup_command_webhooks(&app).await.unwrap();
        assert_eq!(
            app.store()
                .webhooks()
                .cleanup_command_webhooks(now_millis())
                .await
                .unwrap(),
            0
        );

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn expired_mobile_session_gets_one_push_then_the_row_goes() {
        let provider = Arc::new(CountingProvider::default());
        let mut options = ServerOptions::new(ConfigStore::new(test_config()));
        options.push_provider = Some(provider.clone());
        let srv = Server::new(options).await.unwrap();
        srv.start().await.unwrap();
        let app = App::new(srv.clone());

        let mut expired = Session::new("mobile-user");
        expired.device_id = "apple:device-token".to_string();
        expired.expires_at = now_millis() - 60_000;
        app.store().sessions().save(&expired).await.unwrap();

        let mut desktop = Session::new("desktop-user");
        desktop.expires_at = now_millis() - 60_000;
        app.store().sessions().save(&desktop).await.unwrap();

        let live = Session::new("live-user");
        app.store().sessions().save(&live).await.unwrap();

        cleanup_sessions(&app).await.unwrap();

        // Expired rows are gone, the live session survives.
        assert!(app.store().sessions().get(&expired.id).await.is_err());
        assert!(app.store().sessions().get(&desktop.id).await.is_err());
        assert!(app.store().sessions().get(&live.id).await.is_ok());

        // Only the mobile session produced a push.
        srv.shutdown().await;
        assert_eq!(provider.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_notified_sessions_are_not_pushed_again() {
        let provider = Arc::new(CountingProvider::default());
        let mut options = ServerOptions::new(ConfigStore::new(test_config()));
        options.push_provider = Some(provider.clone());
        let srv = Server::new(options).await.unwrap();
        srv.start().await.unwrap();
        let app = App::new(srv.clone());

        let mut session = Session::new("mobile-user");
        session.device_id = "apple:device-token".to_string();
        session.expires_at = now_millis() - 60_000;
        app.store().sessions().save(&session).await.unwrap();
        app.store()
            .sessions()
            .update_expired_notify(&session.id, true)
            .await
            .unwrap();

        cleanup_sessions(&app).await.unwrap();

        srv.shutdown().await;
        assert_eq!(provider.delivered.load(Ordering::SeqCst), 0);
    }
}
