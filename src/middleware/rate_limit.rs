//! Keyed fixed-window rate limiting.
//!
//! # Algorithm
//!
//! Each partition key owns one window:
//!
//! - First request, or `now > reset_time`: start a fresh window with
//!   `count = 1` and `reset_time = now + window_ms`.
//! - `count >= max_requests`: reject with `remaining = 0`, no increment.
//! - Otherwise increment `count`; `remaining = max_requests - count`.
//!
//! A client can issue up to `2 × max_requests` requests across a window
//! boundary (the tail of one window plus the head of the next). This is an
//! accepted property of fixed windows.
//!
//! `max_requests = 0` rejects every request.
//!
//! # Storage
//!
//! Windows live behind the [`RateLimitStore`] trait. The default
//! [`MemoryRateLimitStore`] is a `DashMap`; updates go through its entry API,
//! which holds the shard lock for the read-modify-write so concurrent
//! requests for the same key never lose increments.
//!
//! Expired windows replace themselves on the next hit, so [`RateLimiter::cleanup`]
//! is only needed to bound memory for keys that never come back.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::{debug, trace};

use super::policy::RateLimitConfig;

/// Rate limit store failure.
///
/// The pipeline treats these as fail-open: the request proceeds.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Per-key window state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitData {
    /// Requests accepted in the current window
    pub count: u32,
    /// Epoch milliseconds at which the window ends
    pub reset_time: u64,
    /// Epoch milliseconds of the last request seen
    pub last_request: u64,
}

impl RateLimitData {
    fn fresh(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            reset_time: now_ms.saturating_add(window_ms),
            last_request: now_ms,
        }
    }

    /// A window is expired once `now` is strictly past `reset_time`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms > self.reset_time
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Epoch milliseconds at which the current window ends
    pub reset_time: u64,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, never less than 1.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_time.saturating_sub(now_ms).div_ceil(1000).max(1)
    }
}

/// Backing store for rate-limit windows.
pub trait RateLimitStore: Send + Sync {
    /// Atomically record one request for `key` and return the decision.
    fn hit(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now_ms: u64,
    ) -> Result<RateLimitDecision, RateLimitError>;

    /// Remove every window that has expired at `now_ms`. Returns how many were removed.
    fn purge_expired(&self, now_ms: u64) -> Result<usize, RateLimitError>;

    /// Current window for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<RateLimitData>, RateLimitError>;

    /// Number of tracked keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    windows: DashMap<String, RateLimitData>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn hit(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now_ms: u64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let max = config.max_requests;

        if max == 0 {
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_time: now_ms.saturating_add(config.window_ms),
            });
        }

        let decision = match self.windows.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let data = RateLimitData::fresh(now_ms, config.window_ms);
                vacant.insert(data);
                RateLimitDecision {
                    allowed: true,
                    remaining: max - 1,
                    reset_time: data.reset_time,
                }
            }
            Entry::Occupied(mut occupied) => {
                let data = occupied.get_mut();
                if data.is_expired_at(now_ms) {
                    *data = RateLimitData::fresh(now_ms, config.window_ms);
                    RateLimitDecision {
                        allowed: true,
                        remaining: max - 1,
                        reset_time: data.reset_time,
                    }
                } else if data.count >= max {
                    data.last_request = now_ms;
                    RateLimitDecision {
                        allowed: false,
                        remaining: 0,
                        reset_time: data.reset_time,
                    }
                } else {
                    data.count += 1;
                    data.last_request = now_ms;
                    RateLimitDecision {
                        allowed: true,
                        remaining: max - data.count,
                        reset_time: data.reset_time,
                    }
                }
            }
        };

        Ok(decision)
    }

    fn purge_expired(&self, now_ms: u64) -> Result<usize, RateLimitError> {
        let before = self.windows.len();
        self.windows.retain(|_, data| !data.is_expired_at(now_ms));
        Ok(before.saturating_sub(self.windows.len()))
    }

    fn get(&self, key: &str) -> Result<Option<RateLimitData>, RateLimitError> {
        Ok(self.windows.get(key).map(|entry| *entry.value()))
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

/// Process-wide rate limiter shared by every in-flight request.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Rate limiter backed by a fresh [`MemoryRateLimitStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRateLimitStore::new()))
    }

    /// Record one request for `key` against the current wall clock.
    pub fn check_rate_limit(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitDecision, RateLimitError> {
        self.check_rate_limit_at(key, config, now_millis())
    }

    /// Record one request for `key` at an explicit time.
    pub fn check_rate_limit_at(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now_ms: u64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let decision = self.store.hit(key, config, now_ms)?;
        trace!(
            key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Rate limit checked"
        );
        Ok(decision)
    }

    /// Drop windows that have expired.
    pub fn cleanup(&self) -> Result<usize, RateLimitError> {
        self.cleanup_at(now_millis())
    }

    pub fn cleanup_at(&self, now_ms: u64) -> Result<usize, RateLimitError> {
        let removed = self.store.purge_expired(now_ms)?;
        if removed > 0 {
            debug!(removed, remaining = self.store.len(), "Purged expired rate limit windows");
        }
        Ok(removed)
    }

    /// Current window for `key`, if tracked.
    pub fn window(&self, key: &str) -> Result<Option<RateLimitData>, RateLimitError> {
        self.store.get(key)
    }

    /// Number of tracked partition keys.
    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
