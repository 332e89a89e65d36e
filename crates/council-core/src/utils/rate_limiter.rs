//! Fixed-window rate limiting keyed by caller
//!
//! Each caller key owns a counter and the instant its window ends. The first
//! request after the window ends starts a fresh window. Increment and check
//! happen under a single async lock, so concurrent requests from one key can
//! never both take the last slot.

use super::clock::{saturating_add, Clock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests allowed per window
    pub limit: u32,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(5)
    }
}

impl RateLimitConfig {
    /// Create a new rate limit config
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Create config for requests per minute
    #[must_use]
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }
}

/// Outcome of one [`RateLimiter::check`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Configured limit
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until the window ends, rounded up, at least 1
    #[must_use]
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Current window of one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitUsage {
    /// Requests counted in the window
    pub count: u32,
    /// When the window ends
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// In-memory fixed-window rate limiter
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, Window>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create an empty rate limiter
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request for `key` and decide whether it may proceed.
    ///
    /// A rejected request is not counted.
    pub async fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = self.clock.now();
        let mut windows = self.windows.lock().await;

        let fresh = Window {
            count: 0,
            reset_at: saturating_add(now, config.window),
        };
        let window = windows.entry(key.to_string()).or_insert_with(|| fresh.clone());
        if now >= window.reset_at {
            *window = fresh;
        }

        if window.count >= config.limit {
            debug!(key = %key, count = window.count, limit = config.limit, "Rate limit exceeded");
            return RateLimitDecision {
                allowed: false,
                limit: config.limit,
                remaining: 0,
                reset_at: window.reset_at,
            };
        }

        window.count += 1;
        RateLimitDecision {
            allowed: true,
            limit: config.limit,
            remaining: config.limit - window.count,
            reset_at: window.reset_at,
        }
    }

    /// Current window for `key`, if one is active
    pub async fn usage(&self, key: &str) -> Option<RateLimitUsage> {
        let now = self.clock.now();
        let windows = self.windows.lock().await;
        windows
            .get(key)
            .filter(|w| now < w.reset_at)
            .map(|w| RateLimitUsage {
                count: w.count,
                reset_at: w.reset_at,
            })
    }

    /// Forget the window for `key`
    pub async fn reset(&self, key: &str) {
        self.windows.lock().await.remove(key);
    }

    /// Evict every expired window, returning how many were removed
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, w| now < w.reset_at);
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, remaining = windows.len(), "Rate limiter cleanup");
        }
        removed
    }

    /// Number of tracked keys
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` until `cancel` fires
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Rate limiter cleanup task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        limiter.cleanup().await;
                    }
                }
            }
        })
    }
}
