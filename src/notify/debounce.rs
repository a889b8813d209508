//! Per-(user, event_type) debounce bucket, generalized from the
//! service template's `middleware/rate_limit.rs` `RateLimitLayer`: same
//! sliding-window-per-key shape and periodic `cleanup()`, moved from "per
//! IP, as Axum middleware" to "per (user_id, event_type), as a plain
//! struct method called by the engine's internal dispatch" — there is no
//! HTTP layer in this crate.

use crate::ids::UserId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct DebounceKey {
    user_id: UserId,
    event_type: String,
}

struct DebounceEntry {
    window_start: Instant,
}

/// One notification per (user, event_type) per `window` (default 1/minute,
/// quiet-hours deferral).
pub struct NotificationDebounce {
    window: Duration,
    state: Mutex<HashMap<DebounceKey, DebounceEntry>>,
}

impl NotificationDebounce {
    pub fn new(window: Duration) -> Self {
        Self { window, state: Mutex::new(HashMap::new()) }
    }

    /// Returns `true` if a notification for this key may be sent now,
    /// recording the attempt either way like the rate limiter's `check`.
    pub fn try_acquire(&self, user_id: UserId, event_type: &str) -> bool {
        let key = DebounceKey { user_id, event_type: event_type.to_string() };
        let mut state = self.state.lock();
        let now = Instant::now();

        match state.get_mut(&key) {
            Some(entry) if now.duration_since(entry.window_start) < self.window => false,
            Some(entry) => {
                entry.window_start = now;
                true
            }
            None => {
                state.insert(key, DebounceEntry { window_start: now });
                true
            }
        }
    }

    /// Periodic cleanup of stale entries, called from a background task.
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.window;
        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }
}
