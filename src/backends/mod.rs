//! Cache Backend Implementations
//!
//! # Available Backends
//!
//! ## In-Process (Tier-1)
//! - **`MemoryCache`** - LRU map bounded by entry count and byte budget
//!
//! ## Distributed (Tier-2)
//! - **Redis** - Shared cache across server instances (feature: `redis`, default)
//! - **`UnavailableBackend`** - Stand-in used when the crate is built without a
//!   Redis client; never connects
//!
//! # Usage
//!
//! ```rust,no_run
//! use briefing_cache::backends::{MemoryCache, MemoryCacheConfig, RedisCacheConfig, distributed_backend};
//! use briefing_cache::DistributedBackend;
//!
//! # async fn example() {
//! let tier1 = MemoryCache::new(MemoryCacheConfig::new(1000, 100));
//! let tier2 = distributed_backend(RedisCacheConfig::default());
//! let connected = tier2.connect().await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::traits::DistributedBackend;

pub mod memory_cache;
pub mod unavailable;

#[cfg(feature = "redis")]
pub mod redis_cache;

pub use memory_cache::{KeyInfo, MemoryCache, MemoryCacheConfig};
pub use unavailable::UnavailableBackend;

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

/// Exponential backoff for Tier-2 reconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt; doubles on each following attempt
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Attempts before giving up until the next explicit `connect()`
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

/// Connection settings for the distributed tier
#[derive(Debug, Clone, PartialEq)]
pub struct RedisCacheConfig {
    pub url: String,
    /// Max concurrent in-flight commands
    pub max_connections: usize,
    /// Bound on connect and on every single command
    pub socket_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            max_connections: 10,
            socket_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Build the distributed tier this crate was compiled with
///
/// Redis when the `redis` feature is on; otherwise an [`UnavailableBackend`]
/// that reports a missing client library and stays disconnected.
#[must_use]
pub fn distributed_backend(config: RedisCacheConfig) -> Arc<dyn DistributedBackend> {
    #[cfg(feature = "redis")]
    {
        Arc::new(RedisCache::new(config))
    }

    #[cfg(not(feature = "redis"))]
    {
        Arc::new(UnavailableBackend::new(config.url))
    }
}
