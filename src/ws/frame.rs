//! Wire types for the websocket protocol.
//!
//! Requests carry `{action, seq, data}`; replies carry `{status, seq_reply,
//! data | error}`; server-pushed events carry `{event, data, broadcast,
//! seq}` where `seq` is a per-connection counter stamped at send time.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::AppError;

pub const STATUS_OK: &str = "OK";
pub const STATUS_FAIL: &str = "FAIL";

/// A client request frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebSocketRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl WebSocketRequest {
    /// Returns `data[key]` as a string, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Returns `data[key]` as a list of strings, dropping non-string items.
    pub fn data_str_list(&self, key: &str) -> Vec<String> {
        self.data
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Error body carried inside a FAIL reply. The detailed error text is kept
/// out of the frame; clients only get the stable id and message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsError {
    pub id: String,
    pub message: String,
    pub detailed_error: String,
}

/// A reply to one request, correlated by `seq_reply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketResponse {
    pub status: String,
    pub seq_reply: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WsError>,
}

impl WebSocketResponse {
    pub fn ok(seq_reply: i64, data: Map<String, Value>) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            seq_reply,
            data: if data.is_empty() { None } else { Some(data) },
            error: None,
        }
    }

    /// Builds a FAIL reply from an application error, stripping the detail.
    pub fn error(seq_reply: i64, err: &AppError) -> Self {
        Self {
            status: STATUS_FAIL.to_string(),
            seq_reply,
            data: None,
            error: Some(WsError {
                id: err.id().to_string(),
                message: err.payload().message.clone(),
                detailed_error: String::new(),
            }),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            warn!(error = %e, "failed to serialize websocket response");
            format!(
                r#"{{"status":"FAIL","seq_reply":{},"error":{{"id":"api.web_socket.serialize.app_error","message":"serialization failed","detailed_error":""}}}}"#,
                self.seq_reply
            )
        })
    }
}

/// Targeting rules attached to a pushed event.
///
/// A connection receives the event iff it is authenticated and matches the
/// narrowest non-empty field: user id, then channel membership, then team
/// membership. All-empty targeting reaches every connection. `omit_users`
/// is subtracted in every case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Broadcast {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omit_users: Option<BTreeSet<String>>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub team_id: String,
}

impl Broadcast {
    pub fn to_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn to_channel(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            ..Self::default()
        }
    }

    pub fn to_team(team_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            ..Self::default()
        }
    }

    /// Targets every authenticated connection.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn omit(mut self, user_id: impl Into<String>) -> Self {
        self.omit_users
            .get_or_insert_with(BTreeSet::new)
            .insert(user_id.into());
        self
    }
}

/// A server-pushed event before per-connection sequencing.
#[derive(Debug, Clone)]
pub struct WebSocketEvent {
    pub event: &'static str,
    pub data: Map<String, Value>,
    pub broadcast: Broadcast,
}

impl WebSocketEvent {
    pub fn new(event: &'static str, broadcast: Broadcast) -> Self {
        Self {
            event,
            data: Map::new(),
            broadcast,
        }
    }

    pub fn add(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Serializes everything except the per-connection sequence number, so
    /// a fan-out to N connections serializes once instead of N times.
    pub fn precompute(self) -> PrecomputedEvent {
        #[derive(Serialize)]
        struct Wire<'a> {
            event: &'a str,
            data: &'a Map<String, Value>,
            broadcast: &'a Broadcast,
        }

        let wire = Wire {
            event: self.event,
            data: &self.data,
            broadcast: &self.broadcast,
        };
        let mut prefix = match serde_json::to_string(&wire) {
            Ok(json) => json,
            Err(e) => {
                warn!(event = self.event, error = %e, "failed to precompute event");
                format!(
                    r#"{{"event":{},"data":{{}},"broadcast":{{}}}}"#,
                    Value::String(self.event.to_string())
                )
            }
        };
        // Swap the closing brace for the seq slot filled in by with_seq.
        prefix.pop();
        prefix.push_str(",\"seq\":");

        PrecomputedEvent {
            event: self.event,
            broadcast: self.broadcast,
            prefix,
        }
    }
}

/// A serialized event awaiting its per-connection sequence number.
#[derive(Debug, Clone)]
pub struct PrecomputedEvent {
    pub event: &'static str,
    pub broadcast: Broadcast,
    prefix: String,
}

impl PrecomputedEvent {
    /// Completes the frame with this connection's event counter.
    pub fn with_seq(&self, seq: i64) -> String {
        let mut frame = String::with_capacity(self.prefix.len() + 12);
        frame.push_str(&self.prefix);
        frame.push_str(&seq.to_string());
        frame.push('}');
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::events::EVENT_STATUS_CHANGE;

    #[test]
    fn request_parses_with_defaults() {
        let req: WebSocketRequest =
            serde_json::from_str(r#"{"action":"user_typing","seq":7,"data":{"channel_id":"c1"}}"#)
                .unwrap();
        assert_eq!(req.action, "user_typing");
        assert_eq!(req.seq, 7);
        assert_eq!(req.data_str("channel_id"), Some("c1"));

        let bare: WebSocketRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(bare.action, "");
        assert_eq!(bare.seq, 0);
    }

    #[test]
    fn error_reply_strips_detail() {
        let err = AppError::not_found("app.user.missing.app_error", "user not found")
            .with_detail("user_id=deadbeef");
        let resp = WebSocketResponse::error(4, &err);
        let json = resp.to_json();
        assert!(json.contains(r#""seq_reply":4"#));
        assert!(json.contains("app.user.missing.app_error"));
        assert!(!json.contains("deadbeef"));
        let parsed: WebSocketResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.error.unwrap().detailed_error, "");
    }

    #[test]
    fn precomputed_event_stamps_seq() {
        let event = WebSocketEvent::new(EVENT_STATUS_CHANGE, Broadcast::to_user("u1"))
            .add("status", "away")
            .add("user_id", "u1");
        let pre = event.precompute();
        let frame = pre.with_seq(12);
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["event"], "status_change");
        assert_eq!(parsed["seq"], 12);
        assert_eq!(parsed["data"]["status"], "away");
        assert_eq!(parsed["broadcast"]["user_id"], "u1");

        // Two connections get independent sequence numbers from one
        // serialization pass.
        let other = pre.with_seq(13);
        let parsed: Value = serde_json::from_str(&other).unwrap();
        assert_eq!(parsed["seq"], 13);
    }

    #[test]
    fn broadcast_omit_users_round_trip() {
        let b = Broadcast::to_channel("c9").omit("u1").omit("u2");
        let json = serde_json::to_string(&b).unwrap();
        let back: Broadcast = serde_json::from_str(&json).unwrap();
        let omit = back.omit_users.unwrap();
        assert!(omit.contains("u1") && omit.contains("u2"));
        assert_eq!(back.channel_id, "c9");
    }
}
