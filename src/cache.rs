//! In-memory caches backing the hot request paths.
//!
//! The session cache fronts token lookups so a websocket authentication or
//! an HTTP request does not touch the database on every call. The status
//! cache is the authoritative copy of presence state; the database row is a
//! write-behind snapshot used to warm this cache at startup.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::model::{Session, Status};

/// Token-keyed session cache with a fixed time-to-live.
///
/// Entries are validated on read; stale entries are removed lazily and by
/// the periodic sweep in the job scheduler.
pub struct SessionCache {
    entries: DashMap<String, (Arc<Session>, Instant)>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached session for `token` if present and fresh.
    pub fn get(&self, token: &str) -> Option<Arc<Session>> {
        let hit = self.entries.get(token)?;
        let (session, inserted_at) = hit.value();
        if inserted_at.elapsed() > self.ttl {
            drop(hit);
            self.entries.remove(token);
            return None;
        }
        Some(Arc::clone(session))
    }

    pub fn insert(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.entries.insert(
            session.token.clone(),
            (Arc::clone(&session), Instant::now()),
        );
        session
    }

    /// Drops one token, e.g. on logout or session revocation.
    pub fn invalidate(&self, token: &str) {
        self.entries.remove(token);
    }

    /// Drops every cached session for `user_id`.
    ///
    /// Used when a user's roles or deactivation state change, so the next
    /// request re-reads the database.
    pub fn invalidate_for_user(&self, user_id: &str) {
        self.entries
            .retain(|_, (session, _)| session.user_id != user_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Removes entries past their time-to-live. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, (_, inserted_at)| inserted_at.elapsed() <= self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// String-keyed cache with a fixed time-to-live, for values that are cheap
/// to rebuild from the store: profiles, file infos, pending-post dedup.
pub struct TtlCache<V> {
    entries: DashMap<String, (V, Instant)>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let hit = self.entries.get(key)?;
        let (value, inserted_at) = hit.value();
        if inserted_at.elapsed() > self.ttl {
            drop(hit);
            self.entries.remove(key);
            return None;
        }
        Some(value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), (value, Instant::now()));
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, (_, inserted_at)| inserted_at.elapsed() <= self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Authoritative presence state, keyed by user id.
pub struct StatusCache {
    entries: DashMap<String, Status>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, user_id: &str) -> Option<Status> {
        self.entries.get(user_id).map(|s| s.clone())
    }

    /// Returns statuses for the requested users, defaulting missing entries
    /// to offline so callers always get one entry per id.
    pub fn get_many(&self, user_ids: &[String]) -> Vec<Status> {
        user_ids
            .iter()
            .map(|id| {
                self.entries
                    .get(id)
                    .map(|s| s.clone())
                    .unwrap_or_else(|| Status::new_offline(id))
            })
            .collect()
    }

    pub fn set(&self, status: Status) {
        self.entries.insert(status.user_id.clone(), status);
    }

    /// Runs `apply` against the cached entry for `user_id`, inserting an
    /// offline placeholder first if none exists. Returns the updated copy.
    pub fn update<F>(&self, user_id: &str, apply: F) -> Status
    where
        F: FnOnce(&mut Status),
    {
        let mut entry = self
            .entries
            .entry(user_id.to_string())
            .or_insert_with(|| Status::new_offline(user_id));
        apply(entry.value_mut());
        entry.value().clone()
    }

    pub fn remove(&self, user_id: &str) {
        self.entries.remove(user_id);
    }

    /// Visits every cached status. The callback must not call back into the
    /// cache for the same shard.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&Status),
    {
        for entry in self.entries.iter() {
            visit(entry.value());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{new_id, StatusState};

    fn session_for(user_id: &str) -> Session {
        Session::new(user_id)
    }

    #[test]
    fn session_cache_hit_and_ttl_expiry() {
        let cache = SessionCache::new(Duration::from_millis(0));
        let session = cache.insert(session_for(&new_id()));
        // Zero TTL means the entry is stale immediately.
        assert!(cache.get(&session.token).is_none());
        assert!(cache.is_empty());

        let cache = SessionCache::new(Duration::from_secs(600));
        let session = cache.insert(session_for(&new_id()));
        let hit = cache.get(&session.token).unwrap();
        assert_eq!(hit.user_id, session.user_id);
    }

    #[test]
    fn session_cache_invalidate_for_user() {
        let cache = SessionCache::new(Duration::from_secs(600));
        let user_id = new_id();
        let s1 = cache.insert(session_for(&user_id));
        let s2 = cache.insert(session_for(&user_id));
        let other = cache.insert(session_for(&new_id()));

        cache.invalidate_for_user(&user_id);
        assert!(cache.get(&s1.token).is_none());
        assert!(cache.get(&s2.token).is_none());
        assert!(cache.get(&other.token).is_some());
    }

    #[test]
    fn ttl_cache_expires_and_sweeps() {
        let cache: TtlCache<i64> = TtlCache::new(Duration::from_secs(600));
        cache.insert("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        cache.remove("a");
        assert_eq!(cache.get("a"), None);

        let stale: TtlCache<i64> = TtlCache::new(Duration::from_millis(0));
        stale.insert("b", 2);
        assert_eq!(stale.get("b"), None);
        stale.insert("c", 3);
        assert_eq!(stale.sweep(), 1);
        assert!(stale.is_empty());
    }

    #[test]
    fn status_cache_defaults_to_offline() {
        let cache = StatusCache::new();
        let known = new_id();
        let unknown = new_id();
        cache.set(Status {
            status: StatusState::Online,
            last_activity_at: 42,
            ..Status::new_offline(&known)
        });

        let statuses = cache.get_many(&[known.clone(), unknown.clone()]);
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].status, StatusState::Online);
        assert_eq!(statuses[1].status, StatusState::Offline);
        assert_eq!(statuses[1].user_id, unknown);
    }

    #[test]
    fn status_cache_update_inserts_placeholder() {
        let cache = StatusCache::new();
        let user_id = new_id();
        let updated = cache.update(&user_id, |s| {
            s.status = StatusState::Away;
            s.manual = true;
        });
        assert_eq!(updated.status, StatusState::Away);
        assert!(updated.manual);
        assert_eq!(cache.get(&user_id).unwrap().status, StatusState::Away);
    }
}
