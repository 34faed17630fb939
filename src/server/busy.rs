//! Server busy flag.
//!
//! While busy, non-critical background activity (status broadcasts, warn
//! metric advisories) is suppressed so bulk operations like imports or
//! migrations are not competing with fan-out traffic. The flag expires on
//! its own; a crashed admin client cannot wedge the server in busy mode.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::model::now_millis;

/// Longest a single busy window may last.
pub const MAX_BUSY_SECONDS: i64 = 24 * 60 * 60;

#[derive(Debug, Default)]
pub struct ServerBusy {
    busy: AtomicBool,
    /// Epoch millis after which the flag no longer counts as set.
    expires_at: AtomicI64,
}

impl ServerBusy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the server busy for `seconds`, clamped to
    /// [`MAX_BUSY_SECONDS`]. Zero and negative durations are treated as
    /// one second.
    pub fn set(&self, seconds: i64) {
        let seconds = seconds.clamp(1, MAX_BUSY_SECONDS);
        self.expires_at
            .store(now_millis() + seconds * 1000, Ordering::SeqCst);
        self.busy.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.busy.store(false, Ordering::SeqCst);
        self.expires_at.store(0, Ordering::SeqCst);
    }

    pub fn is_busy(&self) -> bool {
        self.busy_at(now_millis())
    }

    /// When the current window ends, or 0 when not busy.
    pub fn expires_at(&self) -> i64 {
        self.expires_at.load(Ordering::SeqCst)
    }

    fn busy_at(&self, now: i64) -> bool {
        if !self.busy.load(Ordering::SeqCst) {
            return false;
        }
        if self.expires_at.load(Ordering::SeqCst) <= now {
            // Expired window; reset lazily on the next observer.
            self.clear();
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear() {
        let busy = ServerBusy::new();
        assert!(!busy.is_busy());

        busy.set(30);
        assert!(busy.is_busy());
        assert!(busy.expires_at() > now_millis());

        busy.clear();
        assert!(!busy.is_busy());
        assert_eq!(busy.expires_at(), 0);
    }

    #[test]
    fn window_expires_on_its_own() {
        let busy = ServerBusy::new();
        busy.set(60);
        let past_window = busy.expires_at() + 1;
        assert!(!busy.busy_at(past_window));
        // Lazy reset happened; a fresh observation agrees.
        assert!(!busy.is_busy());
    }

    #[test]
    fn duration_is_clamped() {
        let busy = ServerBusy::new();
        busy.set(0);
        assert!(busy.is_busy());

        busy.set(MAX_BUSY_SECONDS * 10);
        let ceiling = now_millis() + (MAX_BUSY_SECONDS + 1) * 1000;
        assert!(busy.expires_at() <= ceiling);
    }
}
