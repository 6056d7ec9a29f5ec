use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::error::RelayError;

/// Fixed-window rate limiter keyed by string (client address).
///
/// The first consumption for a key opens a window; up to `max_events`
/// consumptions succeed until the window elapses, at which point the count
/// resets. Keys are independent — multiple connections from the same address
/// share one budget.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_events: u32,
    window: Duration,
}

struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    /// Create a rate limiter allowing `max_events` per `window` per key.
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_events,
            window,
        }
    }

    /// Consume one event for the given key.
    ///
    /// This is the chat path's suspension point against the limiter's own
    /// clock/state; the limiter owns its state exclusively, so callers touch
    /// no shared mutable state across the call.
    pub fn consume(&self, key: &str) -> Result<(), RelayError> {
        let mut windows = self.windows.lock().unwrap();
        let now = Instant::now();

        let win = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(win.started) >= self.window {
            win.started = now;
            win.count = 0;
        }

        if win.count < self.max_events {
            win.count += 1;
            Ok(())
        } else {
            Err(RelayError::RateExceeded)
        }
    }

    /// Remove entries whose window started longer than `older_than` ago.
    pub fn cleanup(&self, older_than: Duration) {
        let mut windows = self.windows.lock().unwrap();
        let cutoff = Instant::now() - older_than;
        windows.retain(|_, w| w.started > cutoff);
    }
}
