//! Client-side requests/tokens per minute tracking.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

/// Length of one accounting window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Requests kept in reserve below the RPM ceiling.
const REQUEST_SAFETY_MARGIN: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            tokens_per_minute: 90_000,
        }
    }
}

impl RateLimitConfig {
    /// Request count at which dispatch pauses until the window rolls over.
    /// Ceilings at or below the safety margin are used as-is.
    pub fn request_threshold(&self) -> u32 {
        if self.requests_per_minute > REQUEST_SAFETY_MARGIN {
            self.requests_per_minute - REQUEST_SAFETY_MARGIN
        } else {
            self.requests_per_minute.max(1)
        }
    }
}

/// Counters for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub requests: u32,
    pub tokens: u64,
    pub window_elapsed: Duration,
}

#[derive(Debug)]
struct WindowState {
    requests: u32,
    tokens: u64,
    /// Set by the first request of a window, cleared when the window expires.
    window_start: Option<Instant>,
}

impl WindowState {
    fn roll(&mut self, now: Instant) {
        let expired = self
            .window_start
            .is_some_and(|start| now.duration_since(start) >= RATE_LIMIT_WINDOW);
        if expired {
            self.requests = 0;
            self.tokens = 0;
            self.window_start = None;
        }
    }

    fn admits(&self, estimated_tokens: u64, config: &RateLimitConfig) -> bool {
        // A fresh window always admits one request, even one whose estimate
        // alone exceeds the token ceiling.
        if self.requests == 0 {
            return true;
        }
        self.requests < config.request_threshold()
            && self.tokens + estimated_tokens <= config.tokens_per_minute
    }

    fn record(&mut self, estimated_tokens: u64, now: Instant) {
        self.window_start.get_or_insert(now);
        self.requests += 1;
        self.tokens += estimated_tokens;
    }
}

/// Sliding one-minute limiter owned by a single completion client.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WindowState {
                requests: 0,
                tokens: 0,
                window_start: None,
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until the current window has room for a request of the given
    /// estimated size, then count it.
    ///
    /// The lock is never held across the sleep; state is re-checked after
    /// every wake-up.
    pub async fn acquire(&self, estimated_tokens: u64) {
        loop {
            let deadline = {
                let mut state = self.lock();
                let now = Instant::now();
                state.roll(now);
                if state.admits(estimated_tokens, &self.config) {
                    state.record(estimated_tokens, now);
                    debug!(
                        requests = state.requests,
                        tokens = state.tokens,
                        "Rate limit slot acquired"
                    );
                    return;
                }
                state.window_start.unwrap_or(now) + RATE_LIMIT_WINDOW
            };

            info!(
                wait_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Rate limit reached, waiting for window reset"
            );
            tokio::time::sleep_until(deadline).await;
        }
    }

    pub fn status(&self) -> RateLimitStatus {
        let mut state = self.lock();
        let now = Instant::now();
        state.roll(now);
        RateLimitStatus {
            requests: state.requests,
            tokens: state.tokens,
            window_elapsed: state
                .window_start
                .map_or(Duration::ZERO, |start| now.duration_since(start)),
        }
    }
}
