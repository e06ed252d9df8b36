//! Per-agent sliding-window rate limiting.
//!
//! The window is keyed by sender, not by session, so the quota applies
//! fleet-wide to each agent.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::config::MessagingConfig;

pub struct SlidingWindowLimiter {
    window_ms: i64,
    max_events: usize,
    events: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: &MessagingConfig) -> Self {
        Self::with_limits(
            config.rate_limit_window_secs as i64 * 1000,
            config.rate_limit_max_messages,
        )
    }

    pub fn with_limits(window_ms: i64, max_events: usize) -> Self {
        Self {
            window_ms,
            max_events,
            events: Mutex::new(HashMap::new()),
        }
    }

    pub fn window_secs(&self) -> u64 {
        (self.window_ms / 1000) as u64
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    /// Record one event for `key` at `now_ms` if the window has room.
    /// Returns false — without recording anything — when the event would
    /// exceed the cap.
    pub fn check_and_record(&self, key: &str, now_ms: i64) -> bool {
        let mut events = self.events.lock();
        let window = events.entry(key.to_string()).or_default();

        let cutoff = now_ms - self.window_ms;
        while window.front().is_some_and(|&ts| ts <= cutoff) {
            window.pop_front();
        }

        if window.len() >= self.max_events {
            return false;
        }

        window.push_back(now_ms);
        true
    }

    /// Events currently counted against `key`.
    pub fn current_count(&self, key: &str, now_ms: i64) -> usize {
        let events = self.events.lock();
        let cutoff = now_ms - self.window_ms;
        events
            .get(key)
            .map(|window| window.iter().filter(|&&ts| ts > cutoff).count())
            .unwrap_or(0)
    }
}
