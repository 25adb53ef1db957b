//! Fixed-window message throttling keyed by connection.
//!
//! Windows reset lazily on the next check, there is no background
//! sweep. Rejected events still count toward the window, a sustained
//! flood never earns itself an early reset.

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Window {
    count: u32,
    started_at: Instant,
}

pub struct RateLimiter {
    windows: DashMap<String, Window>,
    max_events: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_events,
            window,
        }
    }

    /// Counts one event for `key` and reports whether it is within the
    /// window's budget.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started_at: now,
        });
        if now.duration_since(entry.started_at) >= self.window {
            entry.count = 0;
            entry.started_at = now;
        }
        entry.count = entry.count.saturating_add(1);
        entry.count <= self.max_events
    }

    /// Seconds until the current window for `key` rolls over. At least 1
    /// while a window is open, so clients always get a usable countdown.
    pub fn retry_after_seconds(&self, key: &str) -> u64 {
        match self.windows.get(key) {
            Some(entry) => {
                let elapsed = entry.started_at.elapsed();
                self.window.saturating_sub(elapsed).as_secs().max(1)
            },
            None => 1,
        }
    }

    /// Drops all state for `key`. Called when its connection goes away.
    pub fn forget(&self, key: &str) {
        self.windows.remove(key);
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
