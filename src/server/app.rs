//! Per-request application facade.
//!
//! An [`App`] is a cheap clone handed to every handler: the shared
//! [`Server`] plus the context of the request being served. Domain
//! operations (statuses, channels, files, roles) are `impl App` blocks in
//! their own modules; this file carries only the facade and the
//! cross-cutting session and publish paths.

use std::future::Future;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::cluster::{CLUSTER_EVENT_PUBLISH, ClusterMessage};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::hub::HubSet;
use crate::model::{License, SESSION_ACTIVITY_TIMEOUT_MILLIS, Session, User, now_millis};
use crate::server::Server;
use crate::store::{Store, StoreError};
use crate::telemetry::StoreTimer;
use crate::ws::WebSocketEvent;

/// What is known about the request an [`App`] was created for.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Peer address as reported by the accepting listener.
    pub ip_address: String,
}

/// Application handle scoped to one request or connection.
#[derive(Clone)]
pub struct App {
    srv: Arc<Server>,
    context: RequestContext,
}

impl App {
    pub fn new(srv: Arc<Server>) -> Self {
        Self {
            srv,
            context: RequestContext::default(),
        }
    }

    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.context.ip_address = ip_address.into();
        self
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub(crate) fn srv(&self) -> &Arc<Server> {
        &self.srv
    }

    pub fn store(&self) -> &Store {
        self.srv.store()
    }

    pub fn config(&self) -> Arc<Config> {
        self.srv.config().get()
    }

    pub fn hubs(&self) -> &HubSet {
        self.srv.hubs()
    }

    pub fn license(&self) -> Option<Arc<License>> {
        self.srv.license()
    }

    pub fn is_leader(&self) -> bool {
        self.srv.is_leader()
    }

    /// Spawns `fut` onto the server's tracked task pool.
    pub fn go<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.srv.go(fut);
    }

    /// Fans an event out to local connections and mirrors it to cluster
    /// peers. Mirroring is best effort; the local fan-out always happens.
    pub async fn publish(&self, event: WebSocketEvent) {
        if let Some(cluster) = self.srv.cluster() {
            let payload = json!({
                "event": event.event,
                "data": event.data,
                "broadcast": event.broadcast,
            });
            cluster
                .send_message(ClusterMessage::new(CLUSTER_EVENT_PUBLISH, payload))
                .await;
        }
        self.srv.hubs().publish(event).await;
    }

    /// Resolves a session token, cache first. Expired sessions are
    /// rejected and evicted; live ones get their activity timestamp
    /// refreshed when it has gone stale.
    pub async fn session_for_token(&self, token: &str) -> AppResult<Arc<Session>> {
        if token.is_empty() {
            return Err(invalid_token());
        }

        if let Some(session) = self.srv.session_cache().get(token) {
            if session.is_expired() {
                self.srv.session_cache().invalidate(token);
                return Err(session_expired());
            }
            self.touch_session(&session).await;
            return Ok(session);
        }

        let timer = StoreTimer::new("sessions.get_by_token");
        let lookup = self.store().sessions().get_by_token(token).await;
        drop(timer);
        let session = match lookup {
            Ok(session) => session,
            Err(StoreError::NotFound { .. }) => return Err(invalid_token()),
            Err(err) => return Err(err.into()),
        };
        if session.is_expired() {
            return Err(session_expired());
        }

        let session = self.srv.session_cache().insert(session);
        self.touch_session(&session).await;
        Ok(session)
    }

    async fn touch_session(&self, session: &Arc<Session>) {
        let now = now_millis();
        if now - session.last_activity_at < SESSION_ACTIVITY_TIMEOUT_MILLIS {
            return;
        }
        if let Err(err) = self
            .store()
            .sessions()
            .update_last_activity(&session.id, now)
            .await
        {
            warn!(session_id = %session.id, error = %err, "session activity update failed");
            return;
        }
        let mut updated = (**session).clone();
        updated.last_activity_at = now;
        self.srv.session_cache().insert(updated);
        debug!(session_id = %session.id, "session activity refreshed");
    }

    /// Loads a user through the short-lived profile cache.
    pub async fn get_user(&self, user_id: &str) -> AppResult<User> {
        if let Some(user) = self.srv.profile_cache().get(user_id) {
            return Ok(user);
        }
        let user = self.store().users().get(user_id).await.map_err(|err| match err {
            StoreError::NotFound { .. } => {
                AppError::not_found("app.user.get.missing.app_error", "user not found")
                    .with_detail(format!("user_id={}", user_id))
            }
            other => other.into(),
        })?;
        self.srv.profile_cache().insert(user_id, user.clone());
        Ok(user)
    }

    /// Drops every cached view of this user and tells the hubs their
    /// membership sets are stale. Mirrored to peers so remote caches
    /// follow.
    pub async fn invalidate_cache_for_user(&self, user_id: &str) {
        self.srv.session_cache().invalidate_for_user(user_id);
        self.srv.profile_cache().remove(user_id);
        self.srv.hubs().invalidate_user(user_id).await;
        if let Some(cluster) = self.srv.cluster() {
            cluster
                .send_message(ClusterMessage::new(
                    crate::cluster::CLUSTER_EVENT_INVALIDATE_USER,
                    json!({ "user_id": user_id }),
                ))
                .await;
        }
    }
}

fn invalid_token() -> AppError {
    AppError::unauthorized("app.session.get.invalid_token.app_error", "invalid session token")
}

fn session_expired() -> AppError {
    AppError::unauthorized("app.session.get.expired.app_error", "session expired")
}
