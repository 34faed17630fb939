//! Dispatches client frames to typed action handlers and enforces the
//! authentication state machine.
//!
//! A connection starts unauthenticated; the only action accepted in that
//! state is `authentication_challenge`. Success binds the session,
//! registers the connection with its hub, and schedules the online status
//! transition. Failure closes the socket.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::hub::WebConn;
use crate::metrics;
use crate::server::App;
use crate::ws::events::EVENT_TYPING;
use crate::ws::frame::{Broadcast, WebSocketEvent, WebSocketRequest, WebSocketResponse};

pub const ACTION_AUTHENTICATION_CHALLENGE: &str = "authentication_challenge";
pub const ACTION_USER_TYPING: &str = "user_typing";
pub const ACTION_GET_STATUSES: &str = "get_statuses";
pub const ACTION_GET_STATUSES_BY_IDS: &str = "get_statuses_by_ids";

/// Every action a client may invoke. Unknown wire strings never construct
/// a variant; they surface as a bad-action error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsAction {
    AuthenticationChallenge,
    UserTyping,
    GetStatuses,
    GetStatusesByIds,
}

impl WsAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            ACTION_AUTHENTICATION_CHALLENGE => Some(Self::AuthenticationChallenge),
            ACTION_USER_TYPING => Some(Self::UserTyping),
            ACTION_GET_STATUSES => Some(Self::GetStatuses),
            ACTION_GET_STATUSES_BY_IDS => Some(Self::GetStatusesByIds),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationChallenge => ACTION_AUTHENTICATION_CHALLENGE,
            Self::UserTyping => ACTION_USER_TYPING,
            Self::GetStatuses => ACTION_GET_STATUSES,
            Self::GetStatusesByIds => ACTION_GET_STATUSES_BY_IDS,
        }
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    /// The outbound queue is gone or the connection was shed.
    #[error("connection closed")]
    ConnectionClosed,
    /// Token validation failed during the handshake; the socket closes.
    #[error("authentication failed")]
    AuthenticationFailed,
}

pub type RouteResult = Result<(), RouteError>;

/// Routes one parsed frame. Frame-level violations (missing action,
/// non-positive seq, unknown action) are answered with error frames tagged
/// with the original seq and keep the connection open.
pub async fn route(app: &App, conn: &mut WebConn, req: WebSocketRequest) -> RouteResult {
    if req.action.is_empty() {
        let err = AppError::invalid_input(
            "app.websocket.route.no_action.app_error",
            "no action specified",
        );
        return conn.send_response(&WebSocketResponse::error(req.seq, &err));
    }
    if req.seq <= 0 {
        let err = AppError::invalid_input(
            "app.websocket.route.bad_seq.app_error",
            "invalid sequence number",
        );
        return conn.send_response(&WebSocketResponse::error(req.seq, &err));
    }

    match WsAction::parse(&req.action) {
        None => {
            let err = AppError::invalid_input(
                "app.websocket.route.bad_action.app_error",
                "unknown action",
            )
            .with_detail(format!("action={}", req.action));
            conn.send_response(&WebSocketResponse::error(req.seq, &err))
        }
        Some(WsAction::AuthenticationChallenge) => {
            metrics::record_ws_action(ACTION_AUTHENTICATION_CHALLENGE);
            authenticate(app, conn, &req).await
        }
        Some(_) if !conn.authenticated() => {
            let err = AppError::unauthorized(
                "app.websocket.route.not_authenticated.app_error",
                "not authenticated",
            );
            conn.send_response(&WebSocketResponse::error(req.seq, &err))
        }
        Some(action) => {
            metrics::record_ws_action(action.as_str());
            let outcome = match action {
                WsAction::UserTyping => handle_user_typing(app, conn, &req).await,
                WsAction::GetStatuses => handle_get_statuses(app),
                WsAction::GetStatusesByIds => handle_get_statuses_by_ids(app, &req).await,
                // Handled before dispatch.
                WsAction::AuthenticationChallenge => Ok(None),
            };
            match outcome {
                Ok(Some(data)) => conn.send_response(&WebSocketResponse::ok(req.seq, data)),
                Ok(None) => Ok(()),
                Err(err) => {
                    metrics::record_app_error(err.kind());
                    conn.send_response(&WebSocketResponse::error(req.seq, &err))
                }
            }
        }
    }
}

async fn authenticate(app: &App, conn: &mut WebConn, req: &WebSocketRequest) -> RouteResult {
    if conn.authenticated() {
        // Repeat handshakes change nothing; acknowledge and move on.
        return conn.send_response(&WebSocketResponse::ok(req.seq, Map::new()));
    }

    let token = req.data_str("token").unwrap_or_default().to_string();
    match app.session_for_token(&token).await {
        Ok(session) => {
            conn.bind_session(session);
            tracing::Span::current().record("user_id", tracing::field::display(&conn.user_id));
            app.hubs().register(conn.handle()).await;
            conn.mark_registered();

            let user_id = conn.user_id.clone();
            let app_bg = app.clone();
            app.go(async move {
                if let Err(err) = app_bg.set_status_online(&user_id, false).await {
                    warn!(user_id = %user_id, error = %err, "online transition after connect failed");
                }
            });

            debug!(
                conn_id = %conn.conn_id,
                user_id = %conn.user_id,
                ip = %app.context().ip_address,
                "websocket authenticated"
            );
            conn.send_response(&WebSocketResponse::ok(req.seq, Map::new()))
        }
        Err(err) => {
            metrics::record_app_error(err.kind());
            warn!(
                conn_id = %conn.conn_id,
                ip = %app.context().ip_address,
                error = %err,
                "websocket authentication failed"
            );
            let _ = conn.send_response(&WebSocketResponse::error(req.seq, &err));
            Err(RouteError::AuthenticationFailed)
        }
    }
}

/// Broadcasts a typing notification to the channel, omitting the sender.
async fn handle_user_typing(
    app: &App,
    conn: &WebConn,
    req: &WebSocketRequest,
) -> AppResult<Option<Map<String, Value>>> {
    let channel_id = req.data_str("channel_id").unwrap_or_default();
    if channel_id.is_empty() {
        return Err(AppError::invalid_input(
            "app.websocket.user_typing.channel_id.app_error",
            "channel_id is required",
        ));
    }
    let parent_id = req.data_str("parent_id").unwrap_or_default();

    let event = WebSocketEvent::new(
        EVENT_TYPING,
        Broadcast::to_channel(channel_id).omit(conn.user_id.clone()),
    )
    .add("user_id", conn.user_id.clone())
    .add("parent_id", parent_id);
    app.publish(event).await;
    Ok(None)
}

fn handle_get_statuses(app: &App) -> AppResult<Option<Map<String, Value>>> {
    Ok(Some(app.cached_status_map()))
}

async fn handle_get_statuses_by_ids(
    app: &App,
    req: &WebSocketRequest,
) -> AppResult<Option<Map<String, Value>>> {
    let user_ids = req.data_str_list("user_ids");
    if user_ids.is_empty() {
        return Err(AppError::invalid_input(
            "app.websocket.get_statuses_by_ids.user_ids.app_error",
            "user_ids is required",
        ));
    }
    let statuses = app.get_statuses_by_ids(&user_ids).await?;
    let mut data = Map::new();
    for status in statuses {
        data.insert(
            status.user_id.clone(),
            Value::String(status.status.as_str().to_string()),
        );
    }
    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parse_round_trip() {
        for action in [
            WsAction::AuthenticationChallenge,
            WsAction::UserTyping,
            WsAction::GetStatuses,
            WsAction::GetStatusesByIds,
        ] {
            assert_eq!(WsAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(WsAction::parse("does_not_exist"), None);
        assert_eq!(WsAction::parse(""), None);
    }
}
