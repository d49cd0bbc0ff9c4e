//! Briefing Cache
//!
//! Request cache and rate limiter for the stock-briefing dashboard API:
//! - **Tier-1 Cache**: In-process LRU bounded by entry count and byte budget
//! - **Tier-2 Cache**: Redis shared across instances, optional and self-healing
//! - **Cache Stampede Protection**: per-key locks so a miss is computed once
//! - **Graceful Degradation**: Tier-2 trouble never reaches callers
//! - **Fixed-Window Rate Limiting**: local or Redis counters behind an axum gate
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use briefing_cache::{CacheManager, CacheManagerConfig, CacheStrategy};
//! use briefing_cache::strategy::news_key;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheManager::initialize(CacheManagerConfig::default()).await;
//!
//!     // Computed once even under concurrent misses
//!     let news = cache
//!         .get_or_set(
//!             &news_key("AAPL"),
//!             || async { Ok(serde_json::json!(["Apple beats estimates"])) },
//!             CacheStrategy::News.to_duration(),
//!         )
//!         .await?;
//!
//!     let stats = cache.get_stats();
//!     tracing::info!(hit_rate = stats.combined_hit_rate, "{news}");
//!
//!     cache.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Request → Rate-Limit Gate → Handler → Tier-1 (LRU) → Tier-2 (Redis) → Producer
//!           ↓ over quota                ↓ Hit          ↓ Hit            ↓ Miss
//!           429                         Return         Backfill Tier-1   Store in both
//! ```

pub mod backends;
pub mod cache_manager;
pub mod codecs;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod middleware;
pub mod pattern;
pub mod propagation;
pub mod rate_limit;
pub mod routes;
pub mod server;
pub mod stampede;
pub mod stats;
pub mod strategy;
pub mod traits;

pub use backends::{KeyInfo, MemoryCache, MemoryCacheConfig, RedisCacheConfig, ReconnectPolicy};

#[cfg(feature = "redis")]
pub use backends::RedisCache;

pub use cache_manager::{
    BackendMode, CacheManager, CacheManagerConfig, CacheManagerStats, ClearReport, HealthReport, HealthStatus, Layer,
    MaintenanceReport, TierStats,
};
pub use config::{ConfigError, Settings};
pub use error::{CacheError, CacheResult};
pub use pattern::KeyPattern;
pub use rate_limit::{IdentifierSource, RateLimitResult, RateLimitService, RateLimitStats};
pub use stats::CacheStats;
pub use strategy::CacheStrategy;
pub use traits::{CacheCodec, ClearOutcome, DistributedBackend, RateLimitBackend, SizeEstimator};

// Re-export async_trait for backend implementors
pub use async_trait::async_trait;
