//! Auth sessions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{new_id, now_millis};

/// Batch size for the expired-session reaper.
pub const SESSION_CLEANUP_BATCH_SIZE: i64 = 1000;

/// How stale `last_activity_at` may get before a token lookup writes a
/// fresh value. Keeps the hot auth path from hammering the sessions table.
pub const SESSION_ACTIVITY_TIMEOUT_MILLIS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub token: String,
    pub create_at: i64,
    pub expires_at: i64,
    pub last_activity_at: i64,
    pub user_id: String,
    pub device_id: String,
    pub roles: String,
    pub props: BTreeMap<String, String>,
    /// Whether the expiry push notification for this session went out.
    pub expired_notify: bool,
}

impl Session {
    pub fn new(user_id: &str) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            token: new_id(),
            create_at: now,
            expires_at: 0,
            last_activity_at: now,
            user_id: user_id.to_string(),
            device_id: String::new(),
            roles: String::new(),
            props: BTreeMap::new(),
            expired_notify: false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at > 0 && self.expires_at <= now_millis()
    }

    /// Mobile clients register a push device id; their sessions get the
    /// longer expiry class.
    pub fn is_mobile(&self) -> bool {
        !self.device_id.is_empty()
    }
}
