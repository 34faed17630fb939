//! Outbound email and the invite throttle.
//!
//! Delivery goes through an injected [`EmailSender`]; the default sender
//! logs instead of speaking SMTP, which keeps notification side effects
//! best-effort and testable. Invite fan-out is bounded per inviting user
//! with a GCRA limiter charged for the whole batch up front.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter};
use tracing::{debug, warn};

use crate::config::ConfigStore;
use crate::error::{AppError, AppResult};
use crate::model::Team;
use crate::server::App;
use crate::store::{Store, StoreError, Token};

/// Token type recorded for each pending team invitation.
pub const TOKEN_TYPE_TEAM_INVITATION: &str = "team_invitation";

/// Cap on cached per-sender limiters before a wholesale reset.
const MAX_LIMITER_ENTRIES: usize = 16_384;

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Mail transport. The server treats delivery as best-effort; transports
/// report errors so callers can log them, not so they can abort.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> AppResult<()>;

    /// Probe the transport at startup. Failures are logged, never fatal.
    async fn test_connection(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Default transport: logs the mail instead of delivering it.
#[derive(Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> AppResult<()> {
        debug!(to = %to, subject = %subject, "email delivery skipped (log transport)");
        Ok(())
    }
}

/// Notification email composer with per-sender invite throttling.
pub struct EmailService {
    config: Arc<ConfigStore>,
    store: Store,
    sender: Arc<dyn EmailSender>,
    /// Per-user invite limiters. Quota changes after a config reload only
    /// affect users without a cached limiter.
    invite_limiters: DashMap<String, DirectRateLimiter>,
    clock: DefaultClock,
}

impl EmailService {
    pub fn new(config: Arc<ConfigStore>, store: Store, sender: Arc<dyn EmailSender>) -> Self {
        Self {
            config,
            store,
            sender,
            invite_limiters: DashMap::new(),
            clock: DefaultClock::default(),
        }
    }

    pub async fn test_connection(&self) -> AppResult<()> {
        self.sender.test_connection().await
    }

    /// Send one invitation per address, throttled per inviting user.
    ///
    /// The whole batch is charged against the limiter before anything is
    /// sent. A batch the limiter could admit after waiting fails as
    /// throttled with a retry-after; a batch larger than the burst
    /// allowance can never be admitted, so it fails as limit-exceeded
    /// with no retry-after instead.
    /// Each invitation records a one-shot token; failing to record it fails
    /// the call, while delivery failures are logged and skipped.
    pub async fn send_invite_emails(
        &self,
        team: &Team,
        sender_name: &str,
        sender_id: &str,
        invites: &[String],
    ) -> AppResult<()> {
        if invites.is_empty() {
            return Ok(());
        }
        let cfg = self.config.get();
        if cfg.rate.enable {
            self.check_invite_limit(sender_id, invites.len())?;
        }

        let site_url = cfg.service.site_url.trim_end_matches('/');
        for email in invites {
            let extra = serde_json::json!({ "team_id": team.id, "email": email }).to_string();
            let token = Token::new(TOKEN_TYPE_TEAM_INVITATION, extra);
            self.store.tokens().save(&token).await.map_err(|err| {
                AppError::internal(
                    "app.email.send_invites.save_token.app_error",
                    "unable to record the invitation",
                )
                .with_detail(err.to_string())
            })?;

            let subject = format!(
                "{} invited you to join the {} team",
                sender_name, team.display_name
            );
            let body = format!(
                "{} invited you to join the {} team.\n\nJoin here: \
                 {}/signup_user_complete/?id={}&t={}\n",
                sender_name, team.display_name, site_url, team.invite_id, token.token
            );
            if let Err(err) = self.sender.send(email, &subject, &body).await {
                warn!(to = %email, error = %err, "invite email delivery failed");
            }
        }
        Ok(())
    }

    /// Charge `batch` invites against `sender_id`'s limiter.
    fn check_invite_limit(&self, sender_id: &str, batch: usize) -> AppResult<()> {
        let cfg = self.config.get();
        let per_hour =
            NonZeroU32::new(cfg.rate.invites_per_hour).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(cfg.rate.invite_burst).unwrap_or(per_hour);
        let Some(cost) = u32::try_from(batch).ok().and_then(NonZeroU32::new) else {
            return Err(Self::batch_too_large(batch, burst.get()));
        };

        if self.invite_limiters.len() > MAX_LIMITER_ENTRIES {
            self.invite_limiters.clear();
            debug!(
                "cleared invite rate limiters (exceeded {} entries)",
                MAX_LIMITER_ENTRIES
            );
        }
        let limiter = self
            .invite_limiters
            .entry(sender_id.to_string())
            .or_insert_with(|| RateLimiter::direct(Quota::per_hour(per_hour).allow_burst(burst)));

        match limiter.check_n(cost) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(not_until)) => {
                let wait = not_until.wait_time_from(self.clock.now());
                debug!(user_id = %sender_id, batch, "invite rate limit exceeded");
                Err(AppError::throttled(
                    "app.email.send_invites.rate_limit.app_error",
                    "invite rate limit exceeded, retry later",
                    wait,
                ))
            }
            Err(_) => Err(Self::batch_too_large(batch, burst.get())),
        }
    }

    fn batch_too_large(batch: usize, burst: u32) -> AppError {
        AppError::limit_exceeded(
            "app.email.send_invites.batch_too_large.app_error",
            format!("requested {batch} invitations but at most {burst} are allowed per batch"),
        )
    }
}

impl App {
    /// Emails team invitations on behalf of `sender_id`.
    ///
    /// The sender's display name fronts the invitation text. Addresses
    /// without a mailbox separator are rejected before any limiter quota
    /// is spent on them.
    pub async fn invite_users_to_team(
        &self,
        team_id: &str,
        sender_id: &str,
        invites: &[String],
    ) -> AppResult<()> {
        if invites.is_empty() {
            return Err(AppError::invalid_input(
                "app.team.invite_users.no_invites.app_error",
                "no email addresses to invite",
            ));
        }
        if let Some(bad) = invites.iter().find(|email| !email.contains('@')) {
            return Err(AppError::invalid_input(
                "app.team.invite_users.invalid_email.app_error",
                "invalid email address",
            )
            .with_detail(format!("email={bad}")));
        }

        let team = self.store().teams().get(team_id).await.map_err(|err| match err {
            StoreError::NotFound { .. } => AppError::not_found(
                "app.team.invite_users.team_missing.app_error",
                "team not found",
            )
            .with_detail(format!("team_id={team_id}")),
            other => other.into(),
        })?;
        let sender = self.get_user(sender_id).await?;
        self.srv()
            .email()
            .send_invite_emails(&team, &sender.display_name(), sender_id, invites)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::User;
    use crate::server::tests::{test_config, test_server};
    use crate::server::{Server, ServerOptions};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, to: &str, subject: &str, _body: &str) -> AppResult<()> {
            self.sent.lock().push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    async fn service(config: Config) -> (EmailService, Arc<RecordingSender>) {
        let store = Store::new(":memory:").await.unwrap();
        let sender = Arc::new(RecordingSender::default());
        let service = EmailService::new(Arc::new(ConfigStore::new(config)), store, sender.clone());
        (service, sender)
    }

    fn invites(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user{i}@example.com")).collect()
    }

    #[tokio::test]
    async fn whole_batch_charges_the_limiter() {
        let (service, sender) = service(Config::default()).await;
        let team = Team::new("eng", "Engineering");

        // Default quota is 20/hour with burst 20: one full batch passes,
        // the next single invite must wait.
        service
            .send_invite_emails(&team, "Pat", "sender1", &invites(20))
            .await
            .unwrap();
        assert_eq!(sender.sent.lock().len(), 20);

        let err = service
            .send_invite_emails(&team, "Pat", "sender1", &invites(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "throttled");
        assert!(err.retry_after().is_some());
        assert_eq!(sender.sent.lock().len(), 20);
    }

    #[tokio::test]
    async fn oversized_batch_fails_immediately() {
        let (service, sender) = service(Config::default()).await;
        let team = Team::new("eng", "Engineering");

        let err = service
            .send_invite_emails(&team, "Pat", "sender1", &invites(21))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "limit_exceeded");
        assert!(err.retry_after().is_none());
        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn senders_are_throttled_independently() {
        let (service, _sender) = service(Config::default()).await;
        let team = Team::new("eng", "Engineering");

        service
            .send_invite_emails(&team, "Pat", "sender1", &invites(20))
            .await
            .unwrap();
        service
            .send_invite_emails(&team, "Sam", "sender2", &invites(20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disabled_rate_limit_passes_any_batch() {
        let mut config = Config::default();
        config.rate.enable = false;
        let (service, sender) = service(config).await;
        let team = Team::new("eng", "Engineering");

        service
            .send_invite_emails(&team, "Pat", "sender1", &invites(50))
            .await
            .unwrap();
        assert_eq!(sender.sent.lock().len(), 50);
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let (service, sender) = service(Config::default()).await;
        let team = Team::new("eng", "Engineering");
        service
            .send_invite_emails(&team, "Pat", "sender1", &[])
            .await
            .unwrap();
        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn team_invites_carry_the_senders_display_name() {
        let sender = Arc::new(RecordingSender::default());
        let mut options = ServerOptions::new(ConfigStore::new(test_config()));
        options.email_sender = Some(sender.clone());
        let srv = Server::new(options).await.unwrap();
        srv.start().await.unwrap();
        let app = App::new(srv.clone());

        let team = Team::new("eng", "Engineering");
        app.store().teams().save(&team).await.unwrap();
        let mut inviter = User::new("pat", "pat@example.com");
        inviter.nickname = "Patricia".to_string();
        inviter.pre_save();
        app.store().users().save(&inviter).await.unwrap();

        app.invite_users_to_team(&team.id, &inviter.id, &invites(2))
            .await
            .unwrap();

        {
            let sent = sender.sent.lock();
            assert_eq!(sent.len(), 2);
            assert!(sent[0].1.contains("Patricia"));
            assert!(sent[0].1.contains("Engineering"));
        }
        srv.shutdown().await;
    }

    #[tokio::test]
    async fn team_invites_validate_addresses_and_team() {
        let srv = test_server().await;
        let app = App::new(srv.clone());
        let mut inviter = User::new("pat", "pat@example.com");
        inviter.pre_save();
        app.store().users().save(&inviter).await.unwrap();

        let err = app
            .invite_users_to_team("missing", &inviter.id, &invites(1))
            .await
            .unwrap_err();
        assert_eq!(err.id(), "app.team.invite_users.team_missing.app_error");

        let team = Team::new("eng", "Engineering");
        app.store().teams().save(&team).await.unwrap();
        let err = app
            .invite_users_to_team(&team.id, &inviter.id, &["not-an-address".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.id(), "app.team.invite_users.invalid_email.app_error");

        let err = app
            .invite_users_to_team(&team.id, &inviter.id, &[])
            .await
            .unwrap_err();
        assert_eq!(err.id(), "app.team.invite_users.no_invites.app_error");

        srv.shutdown().await;
    }
}
