//! Fixed-Window Rate Limiting
//!
//! Per-identifier request counters with a local (single-process) backend, a
//! Redis backend shared across instances, and a service that falls back from
//! the latter to the former on the first distributed failure.
//!
//! # Example
//!
//! ```rust
//! use briefing_cache::rate_limit::RateLimitService;
//! use briefing_cache::RateLimitBackend;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let limiter = RateLimitService::local();
//! let result = limiter.check("203.0.113.7", 100, 60).await?;
//! assert!(result.allowed);
//! assert_eq!(result.remaining, 99);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::stats::ratio;

#[cfg(feature = "redis")]
mod distributed;
mod memory;
mod service;

#[cfg(feature = "redis")]
pub use distributed::RedisRateLimiter;
pub use memory::MemoryRateLimiter;
pub use service::RateLimitService;

/// Longest window honoured; larger values are clamped
const MAX_WINDOW_SECONDS: u64 = 366 * 24 * 60 * 60;

/// Outcome of one rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// End of the current window
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until a retry can succeed; set only when blocked
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    #[must_use]
    pub fn allow(limit: u32, remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after: None,
        }
    }

    /// Rejection with `retry_after = ceil(reset_at - now)`, at least one second
    #[must_use]
    pub fn block(limit: u32, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let millis = (reset_at - now).num_milliseconds().max(0).unsigned_abs();
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after: Some(millis.div_ceil(1000).max(1)),
        }
    }

    /// Window end as Unix epoch seconds
    #[must_use]
    pub fn reset_epoch(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

/// Request counters of a limiter
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    pub total_requests: u64,
    pub blocked_requests: u64,
}

impl RateLimitStats {
    /// `blocked / total`, zero before the first request
    #[must_use]
    pub fn block_rate(&self) -> f64 {
        ratio(self.blocked_requests, self.total_requests)
    }
}

impl std::ops::Add for RateLimitStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            total_requests: self.total_requests + rhs.total_requests,
            blocked_requests: self.blocked_requests + rhs.blocked_requests,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicRateLimitStats {
    total: AtomicU64,
    blocked: AtomicU64,
}

impl AtomicRateLimitStats {
    pub(crate) fn record(&self, result: &RateLimitResult) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if !result.allowed {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> RateLimitStats {
        RateLimitStats {
            total_requests: self.total.load(Ordering::Relaxed),
            blocked_requests: self.blocked.load(Ordering::Relaxed),
        }
    }
}

/// Where the caller identifier comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierSource {
    /// Client address (forwarding headers, then the socket)
    #[default]
    Ip,
    /// `X-API-Key` header
    ApiKey,
    /// `X-User-Id` header
    UserId,
}

impl IdentifierSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::ApiKey => "api_key",
            Self::UserId => "user_id",
        }
    }
}

impl fmt::Display for IdentifierSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" => Ok(Self::Ip),
            "api_key" => Ok(Self::ApiKey),
            "user_id" => Ok(Self::UserId),
            other => Err(format!("unknown identifier source '{other}' (expected ip, api_key or user_id)")),
        }
    }
}

/// Window length as a chrono delta
pub(crate) fn window_length(window_seconds: u64) -> TimeDelta {
    let secs = i64::try_from(window_seconds.min(MAX_WINDOW_SECONDS)).unwrap_or_default();
    TimeDelta::seconds(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        let now = Utc::now();
        let result = RateLimitResult::block(3, now + TimeDelta::milliseconds(1500), now);

        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.retry_after, Some(2));
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let now = Utc::now();
        let result = RateLimitResult::block(3, now, now);

        assert_eq!(result.retry_after, Some(1));
    }

    #[test]
    fn test_block_rate() {
        let stats = RateLimitStats {
            total_requests: 8,
            blocked_requests: 2,
        };
        assert!((stats.block_rate() - 0.25).abs() < f64::EPSILON);
        assert!(RateLimitStats::default().block_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_identifier_source_parse() {
        assert_eq!("ip".parse::<IdentifierSource>(), Ok(IdentifierSource::Ip));
        assert_eq!("API_KEY".parse::<IdentifierSource>(), Ok(IdentifierSource::ApiKey));
        assert_eq!("user_id".parse::<IdentifierSource>(), Ok(IdentifierSource::UserId));
        assert!("cookie".parse::<IdentifierSource>().is_err());
    }
}
