//! Redis fixed-window limiter shared across instances

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{info, warn};

use super::{AtomicRateLimitStats, RateLimitResult, RateLimitStats, window_length};
use crate::backends::redis_cache::open_connection;
use crate::traits::RateLimitBackend;

/// Redis key holding an identifier's counter
fn counter_key(identifier: &str) -> String {
    format!("ratelimit:{identifier}")
}

/// Limiter backed by an expiring Redis counter (`INCR` + `EXPIRE`)
///
/// Every error is returned to the caller; falling back is the service's job.
/// Only successful checks are counted in the stats.
pub struct RedisRateLimiter {
    url: String,
    timeout: Duration,
    conn: RwLock<Option<ConnectionManager>>,
    stats: AtomicRateLimitStats,
}

impl RedisRateLimiter {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            conn: RwLock::new(None),
            stats: AtomicRateLimitStats::default(),
        }
    }

    /// Connect to Redis; failure is logged and leaves the limiter unusable
    pub async fn connect(&self) -> bool {
        match open_connection(&self.url, self.timeout).await {
            Ok(conn) => {
                *self.conn.write() = Some(conn);
                info!(redis_url = %self.url, "Rate Limiter: Redis connected");
                true
            }
            Err(e) => {
                warn!(redis_url = %self.url, error = %format!("{e:#}"), "Rate Limiter: Redis connection failed");
                false
            }
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.read().is_some()
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.conn
            .read()
            .clone()
            .ok_or_else(|| anyhow!("Redis rate limiter is not connected"))
    }
}

// ===== Trait Implementations =====

#[async_trait]
impl RateLimitBackend for RedisRateLimiter {
    async fn check(&self, identifier: &str, limit: u32, window_seconds: u64) -> Result<RateLimitResult> {
        let mut conn = self.connection()?;
        let key = counter_key(identifier);
        let now = Utc::now();

        let (count, ttl): (u64, i64) = tokio::time::timeout(
            self.timeout,
            redis::pipe().atomic().incr(&key, 1u64).ttl(&key).query_async(&mut conn),
        )
        .await
        .context("Rate limit check timed out")?
        .with_context(|| format!("Rate limit check failed for {key}"))?;

        // A fresh counter (or one that lost its expiry) starts the window
        let ttl_secs = if ttl < 0 {
            let window = i64::try_from(window_seconds).unwrap_or(i64::MAX);
            let _: () = tokio::time::timeout(self.timeout, conn.expire(&key, window))
                .await
                .context("Rate limit expiry timed out")?
                .with_context(|| format!("Failed to set expiry on {key}"))?;
            window_seconds
        } else {
            ttl.unsigned_abs()
        };

        let reset_at = now + window_length(ttl_secs);
        let limit_u64 = u64::from(limit);
        let result = if count > limit_u64 {
            RateLimitResult::block(limit, reset_at, now)
        } else {
            let remaining = u32::try_from(limit_u64 - count).unwrap_or(0);
            RateLimitResult::allow(limit, remaining, reset_at)
        };

        self.stats.record(&result);
        Ok(result)
    }

    async fn reset(&self, identifier: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let key = counter_key(identifier);

        let removed: usize = tokio::time::timeout(self.timeout, conn.del(&key))
            .await
            .context("Rate limit reset timed out")?
            .with_context(|| format!("Failed to delete {key}"))?;
        Ok(removed > 0)
    }

    fn stats(&self) -> RateLimitStats {
        self.stats.snapshot()
    }

    fn name(&self) -> &'static str {
        "redis"
    }

    async fn close(&self) {
        *self.conn.write() = None;
    }
}
