//! Local fixed-window limiter

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::{AtomicRateLimitStats, RateLimitResult, RateLimitStats, window_length};
use crate::traits::RateLimitBackend;

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_start: DateTime<Utc>,
}

/// Single-process limiter backed by a `DashMap`
///
/// The increment and the limit decision happen while holding the entry's
/// shard lock, so concurrent checks on one identifier are serialized.
#[derive(Default)]
pub struct MemoryRateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    stats: AtomicRateLimitStats,
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request and decide synchronously
    pub fn check_now(&self, identifier: &str, limit: u32, window_seconds: u64) -> RateLimitResult {
        let now = Utc::now();
        let window = window_length(window_seconds);

        let result = {
            let mut entry = self
                .entries
                .entry(identifier.to_string())
                .or_insert(RateLimitEntry {
                    count: 0,
                    window_start: now,
                });

            if now >= entry.window_start + window {
                entry.count = 0;
                entry.window_start = now;
            }

            entry.count = entry.count.saturating_add(1);
            let reset_at = entry.window_start + window;

            if entry.count > limit {
                RateLimitResult::block(limit, reset_at, now)
            } else {
                RateLimitResult::allow(limit, limit - entry.count, reset_at)
            }
        };

        self.stats.record(&result);
        if !result.allowed {
            debug!(identifier = %identifier, limit, "[RateLimit] Request blocked");
        }
        result
    }

    /// Drop every identifier whose window has ended
    pub fn cleanup_expired(&self, window_seconds: u64) -> usize {
        let now = Utc::now();
        let window = window_length(window_seconds);
        let before = self.entries.len();

        self.entries.retain(|_, entry| now < entry.window_start + window);

        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(count = removed, "[RateLimit] Cleaned up expired windows");
        }
        removed
    }

    /// Drop one identifier's window
    pub fn remove(&self, identifier: &str) -> bool {
        self.entries.remove(identifier).is_some()
    }

    /// Number of identifiers currently tracked
    #[must_use]
    pub fn tracked_identifiers(&self) -> usize {
        self.entries.len()
    }
}

// ===== Trait Implementations =====

#[async_trait]
impl RateLimitBackend for MemoryRateLimiter {
    async fn check(&self, identifier: &str, limit: u32, window_seconds: u64) -> Result<RateLimitResult> {
        Ok(self.check_now(identifier, limit, window_seconds))
    }

    async fn reset(&self, identifier: &str) -> Result<bool> {
        Ok(self.remove(identifier))
    }

    fn stats(&self) -> RateLimitStats {
        self.stats.snapshot()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
