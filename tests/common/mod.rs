//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - Manager setup for each backend mode
//! - In-process stand-ins for the distributed tier and the limiter store
//! - Test data generators

#![allow(dead_code)]

use anyhow::{Result, anyhow};
use briefing_cache::{
    BackendMode, CacheManager, CacheManagerConfig, CacheStats, ClearOutcome, DistributedBackend, KeyPattern,
    MemoryCacheConfig, RateLimitBackend, RateLimitResult, RateLimitStats, RedisCacheConfig, async_trait,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Get Redis URL from environment or use default
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string())
}

/// A Redis address nothing listens on
pub const UNREACHABLE_REDIS_URL: &str = "redis://127.0.0.1:1/0";

/// Create a test key with unique suffix
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Tier-1 only manager
pub async fn setup_memory_manager() -> Arc<CacheManager> {
    Arc::new(CacheManager::initialize(CacheManagerConfig::default()).await)
}

/// Tier-1 only manager with a small entry limit
pub async fn setup_bounded_manager(max_entries: usize) -> Arc<CacheManager> {
    let config = CacheManagerConfig {
        tier1: MemoryCacheConfig::new(max_entries, 100),
        ..CacheManagerConfig::default()
    };
    Arc::new(CacheManager::initialize(config).await)
}

/// Layered manager over the given stand-in tier
pub async fn setup_layered_manager(tier2: Arc<InMemoryTier>) -> Arc<CacheManager> {
    let config = CacheManagerConfig {
        mode: BackendMode::Layered,
        ..CacheManagerConfig::default()
    };
    let tier2: Arc<dyn DistributedBackend> = tier2;
    Arc::new(CacheManager::with_backend(config, Some(tier2)).await)
}

/// Layered manager against the Redis at `REDIS_URL`
pub async fn setup_redis_manager() -> Arc<CacheManager> {
    let config = CacheManagerConfig {
        mode: BackendMode::Layered,
        redis: RedisCacheConfig {
            url: redis_url(),
            ..RedisCacheConfig::default()
        },
        ..CacheManagerConfig::default()
    };
    Arc::new(CacheManager::initialize(config).await)
}

/// Distributed tier kept in a process-local map
///
/// Records the TTL of every write so tests can check what reached Tier-2.
pub struct InMemoryTier {
    entries: Mutex<HashMap<String, (serde_json::Value, Duration)>>,
    reachable: bool,
    read_delay: Duration,
    connected: AtomicBool,
}

impl InMemoryTier {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            reachable: true,
            read_delay: Duration::ZERO,
            connected: AtomicBool::new(false),
        }
    }

    /// A tier whose reads stall for `read_delay` before answering
    pub fn slow(read_delay: Duration) -> Self {
        Self {
            read_delay,
            ..Self::new()
        }
    }

    /// A tier whose `connect()` always fails
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    pub fn insert(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        self.entries.lock().insert(key.to_string(), (value, ttl));
    }

    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.lock().get(key).map(|(_, ttl)| *ttl)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[async_trait]
impl DistributedBackend for InMemoryTier {
    async fn connect(&self) -> bool {
        self.connected.store(self.reachable, Ordering::SeqCst);
        self.reachable
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.entries.lock().get(key).map(|(value, _)| value.clone())
    }

    async fn set(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> bool {
        self.insert(key, value.clone(), ttl);
        true
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    async fn clear(&self) -> ClearOutcome {
        self.entries.lock().clear();
        ClearOutcome::Unknown
    }

    async fn clear_pattern(&self, pattern: &str) -> usize {
        let Ok(pattern) = KeyPattern::parse(pattern) else {
            return 0;
        };
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        before - entries.len()
    }

    async fn keys(&self, pattern: &str) -> Vec<String> {
        let Ok(pattern) = KeyPattern::parse(pattern) else {
            return Vec::new();
        };
        self.entries
            .lock()
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect()
    }

    async fn ping(&self) -> bool {
        self.is_connected()
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

/// Limiter store whose every call fails
#[derive(Default)]
pub struct FailingLimiter {
    pub calls: AtomicU32,
}

impl FailingLimiter {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateLimitBackend for FailingLimiter {
    async fn check(&self, _identifier: &str, _limit: u32, _window_seconds: u64) -> Result<RateLimitResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("rate limit store unreachable"))
    }

    async fn reset(&self, _identifier: &str) -> Result<bool> {
        Err(anyhow!("rate limit store unreachable"))
    }

    fn stats(&self) -> RateLimitStats {
        RateLimitStats::default()
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Generate test data of various types
pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct StockQuote {
        pub ticker: String,
        pub price: f64,
        pub change_percent: f64,
    }

    impl StockQuote {
        pub fn new(ticker: &str, price: f64) -> Self {
            Self {
                ticker: ticker.to_string(),
                price,
                change_percent: 1.25,
            }
        }
    }

    /// JSON stock detail
    pub fn json_stock(ticker: &str) -> serde_json::Value {
        serde_json::json!({
            "ticker": ticker,
            "name": format!("{ticker} Inc."),
            "price": 187.42,
            "volume": 51_234_000,
        })
    }

    /// JSON news list
    pub fn json_news(ticker: &str, count: usize) -> serde_json::Value {
        let items: Vec<serde_json::Value> = (0..count)
            .map(|i| serde_json::json!({"title": format!("{ticker} headline {i}"), "source": "wire"}))
            .collect();
        serde_json::Value::Array(items)
    }

    /// JSON payload of roughly `size_kb` kilobytes
    pub fn json_data_sized(size_kb: usize) -> serde_json::Value {
        serde_json::json!({
            "data": "x".repeat(size_kb * 1024),
            "size_kb": size_kb
        })
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    use tokio::time::{Duration, sleep};

    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let key1 = test_key("stock");
        let key2 = test_key("stock");
        assert_ne!(key1, key2, "Keys should be unique");
        assert!(key1.starts_with("test_stock_"));
    }

    #[tokio::test]
    async fn test_unreachable_tier_never_connects() {
        let tier = InMemoryTier::unreachable();
        assert!(!tier.connect().await);
        assert!(!tier.is_connected());
    }
}
