//! One websocket connection: the reader loop, the writer task, and the
//! handle a hub keeps for fan-out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::model::{new_id, Session};
use crate::server::App;
use crate::store::Store;
use crate::ws::{route, PrecomputedEvent, RouteError, WebSocketRequest, WebSocketResponse};

/// Outbound queue depth per connection. A full queue sheds the consumer.
const SEND_QUEUE_SIZE: usize = 256;

/// How long an unauthenticated connection may idle before the handshake.
const AUTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection state owned by the reader task.
pub struct WebConn {
    pub conn_id: String,
    pub user_id: String,
    session: Option<Arc<Session>>,
    tx: mpsc::Sender<String>,
    death: CancellationToken,
    registered: bool,
}

impl WebConn {
    fn new(tx: mpsc::Sender<String>, death: CancellationToken) -> Self {
        Self {
            conn_id: new_id(),
            user_id: String::new(),
            session: None,
            tx,
            death,
            registered: false,
        }
    }

    pub fn authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Binds a validated session; the connection is authenticated from here.
    pub fn bind_session(&mut self, session: Arc<Session>) {
        self.user_id = session.user_id.clone();
        self.session = Some(session);
    }

    pub fn mark_registered(&mut self) {
        self.registered = true;
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Builds the handle the hub keeps for this connection.
    pub fn handle(&self) -> ConnHandle {
        let session_id = self
            .session
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_default();
        ConnHandle::new(
            self.conn_id.clone(),
            self.user_id.clone(),
            session_id,
            self.tx.clone(),
            self.death.clone(),
        )
    }

    /// Queues a reply frame. A full queue sheds this connection.
    pub fn send_response(&self, resp: &WebSocketResponse) -> Result<(), RouteError> {
        match self.tx.try_send(resp.to_json()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %self.conn_id, "send queue full; closing connection");
                crate::metrics::record_broadcast_dropped();
                self.death.cancel();
                Err(RouteError::ConnectionClosed)
            }
            Err(TrySendError::Closed(_)) => Err(RouteError::ConnectionClosed),
        }
    }
}

/// The hub's view of one connection. Membership sets are loaded lazily for
/// broadcast targeting and dropped when the hub is told they went stale.
pub struct ConnHandle {
    pub conn_id: String,
    pub user_id: String,
    pub session_id: String,
    tx: mpsc::Sender<String>,
    death: CancellationToken,
    event_seq: i64,
    channel_ids: Option<HashSet<String>>,
    team_ids: Option<HashSet<String>>,
}

impl ConnHandle {
    pub(crate) fn new(
        conn_id: String,
        user_id: String,
        session_id: String,
        tx: mpsc::Sender<String>,
        death: CancellationToken,
    ) -> Self {
        Self {
            conn_id,
            user_id,
            session_id,
            tx,
            death,
            event_seq: 0,
            channel_ids: None,
            team_ids: None,
        }
    }

    /// Stamps the next per-connection sequence number and queues the frame.
    pub(crate) fn send_event(
        &mut self,
        event: &PrecomputedEvent,
    ) -> Result<(), TrySendError<String>> {
        self.event_seq += 1;
        self.tx.try_send(event.with_seq(self.event_seq))
    }

    pub(crate) fn cancel(&self) {
        self.death.cancel();
    }

    pub(crate) fn invalidate_memberships(&mut self) {
        self.channel_ids = None;
        self.team_ids = None;
    }

    /// Applies the event's targeting rules to this connection.
    pub(crate) async fn should_receive(&mut self, store: &Store, event: &PrecomputedEvent) -> bool {
        let broadcast = &event.broadcast;
        if let Some(omit) = &broadcast.omit_users
            && omit.contains(&self.user_id)
        {
            return false;
        }
        if !broadcast.user_id.is_empty() {
            return self.user_id == broadcast.user_id;
        }
        if !broadcast.channel_id.is_empty() {
            return self.is_member_of_channel(store, &broadcast.channel_id).await;
        }
        if !broadcast.team_id.is_empty() {
            return self.is_member_of_team(store, &broadcast.team_id).await;
        }
        true
    }

    async fn is_member_of_channel(&mut self, store: &Store, channel_id: &str) -> bool {
        if self.channel_ids.is_none() {
            match store.channels().get_member_channel_ids(&self.user_id).await {
                Ok(ids) => self.channel_ids = Some(ids.into_iter().collect()),
                Err(err) => {
                    warn!(user_id = %self.user_id, error = %err, "channel membership load failed; withholding event");
                    return false;
                }
            }
        }
        self.channel_ids
            .as_ref()
            .is_some_and(|ids| ids.contains(channel_id))
    }

    async fn is_member_of_team(&mut self, store: &Store, team_id: &str) -> bool {
        if self.team_ids.is_none() {
            match store.teams().get_members_for_user(&self.user_id).await {
                Ok(members) => {
                    self.team_ids = Some(members.into_iter().map(|m| m.team_id).collect());
                }
                Err(err) => {
                    warn!(user_id = %self.user_id, error = %err, "team membership load failed; withholding event");
                    return false;
                }
            }
        }
        self.team_ids
            .as_ref()
            .is_some_and(|ids| ids.contains(team_id))
    }
}

/// Drives one accepted websocket until it closes, then unregisters it.
pub async fn run<S>(app: App, stream: WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, mut source) = stream.split();
    let (tx, rx) = mpsc::channel(SEND_QUEUE_SIZE);
    let death = CancellationToken::new();
    let write_timeout = Duration::from_secs(app.config().service.write_timeout_secs);
    app.go(writer_loop(sink, rx, death.clone(), write_timeout));

    let mut conn = WebConn::new(tx, death);
    let span = crate::telemetry::spans::websocket(&conn.conn_id);
    read_loop(&app, &mut conn, &mut source).instrument(span).await;

    conn.death.cancel();
    if conn.is_registered() {
        app.hubs().unregister(&conn.user_id, &conn.conn_id).await;
    }
    debug!(conn_id = %conn.conn_id, "websocket connection closed");
}

async fn read_loop<S>(
    app: &App,
    conn: &mut WebConn,
    source: &mut SplitStream<WebSocketStream<S>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let next = if conn.authenticated() {
            tokio::select! {
                _ = conn.death.cancelled() => return,
                frame = source.next() => frame,
            }
        } else {
            match tokio::time::timeout(AUTH_TIMEOUT, source.next()).await {
                Ok(frame) => frame,
                Err(_) => {
                    debug!(conn_id = %conn.conn_id, "authentication timeout");
                    return;
                }
            }
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                debug!(conn_id = %conn.conn_id, error = %err, "websocket read failed");
                return;
            }
            None => return,
        };

        let text = match &message {
            Message::Text(text) => text.as_str(),
            Message::Binary(raw) => match std::str::from_utf8(raw) {
                Ok(text) => text,
                Err(_) => {
                    debug!(conn_id = %conn.conn_id, "binary frame is not valid utf-8");
                    return;
                }
            },
            Message::Close(_) => return,
            // Ping/pong are answered by the protocol layer.
            _ => continue,
        };

        let request: WebSocketRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(err) => {
                debug!(conn_id = %conn.conn_id, error = %err, "malformed websocket frame");
                return;
            }
        };

        match route(app, conn, request).await {
            Ok(()) => {}
            Err(RouteError::AuthenticationFailed) | Err(RouteError::ConnectionClosed) => return,
        }
    }
}

/// Drains the bounded outbound queue into the socket. Each write runs
/// under the configured timeout; a peer that stops reading would
/// otherwise park this task on tcp backpressure past any cancellation.
async fn writer_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::Receiver<String>,
    death: CancellationToken,
    write_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            _ = death.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(text) => {
                    match tokio::time::timeout(write_timeout, sink.send(Message::Text(text))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            debug!(error = %err, "websocket write failed");
                            death.cancel();
                            break;
                        }
                        Err(_) => {
                            warn!("websocket write timed out; dropping the connection");
                            death.cancel();
                            break;
                        }
                    }
                }
                None => break,
            }
        }
    }
    let _ = sink.close().await;
}
