//! Memory Cache - In-Process LRU Backend (Tier-1)
//!
//! Bounded by entry count and by an estimated byte budget. Every operation is
//! synchronous and holds the cache mutex only for the map update, so callers
//! are never suspended.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::codecs::JsonCodec;
use crate::error::{CacheError, CacheResult};
use crate::pattern::KeyPattern;
use crate::stats::{AtomicCacheStats, CacheStats};
use crate::traits::SizeEstimator;

/// Footprint charged for a value whose size could not be estimated
pub const DEFAULT_ENTRY_SIZE: usize = 1024;

const BYTES_PER_MB: usize = 1024 * 1024;

/// Longest TTL an entry can carry; longer requests are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Cache entry with TTL and footprint information
#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
    size_bytes: usize,
    created_at: Instant,
}

impl CacheEntry {
    fn new(value: serde_json::Value, ttl: Duration, size_bytes: usize) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl.min(MAX_TTL))
            .unwrap_or_else(|| now + Duration::from_secs(24 * 60 * 60));
        Self {
            value,
            expires_at,
            size_bytes,
            created_at: now,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }

    fn ttl_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Configuration for `MemoryCache`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCacheConfig {
    /// Max number of entries
    pub max_entries: usize,
    /// Max estimated footprint of all entries, in bytes
    pub max_memory_bytes: usize,
}

impl MemoryCacheConfig {
    /// Build a config from an entry limit and a budget in megabytes
    #[must_use]
    pub fn new(max_entries: usize, max_memory_mb: usize) -> Self {
        Self {
            max_entries,
            max_memory_bytes: max_memory_mb.saturating_mul(BYTES_PER_MB),
        }
    }
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self::new(1000, 100)
    }
}

/// Description of one live Tier-1 key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub key: String,
    pub ttl_remaining: u64,
    pub size_bytes: usize,
    pub age_seconds: u64,
}

/// Access-ordered map: front is least recently used, back is most recent
#[derive(Default)]
struct Lru {
    entries: IndexMap<String, CacheEntry>,
    memory_bytes: usize,
}

impl Lru {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.shift_remove(key)?;
        self.memory_bytes -= entry.size_bytes;
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let (key, entry) = self.entries.shift_remove_index(0)?;
        self.memory_bytes -= entry.size_bytes;
        Some(key)
    }

    fn touch(&mut self, key: &str) {
        if let Some(index) = self.entries.get_index_of(key) {
            let last = self.entries.len() - 1;
            self.entries.move_index(index, last);
        }
    }
}

/// In-process LRU cache with per-key TTL
///
/// - Least-recently-used eviction; reads and writes both refresh recency
/// - Entry-count and byte-budget limits enforced before every insert
/// - Expired entries are dropped when a lookup meets them, or in bulk by
///   [`cleanup_expired`](Self::cleanup_expired)
///
/// **Example**:
/// ```rust
/// use briefing_cache::backends::{MemoryCache, MemoryCacheConfig};
/// use std::time::Duration;
///
/// let cache = MemoryCache::new(MemoryCacheConfig::new(100, 10));
/// cache.set("news_AAPL", serde_json::json!(["headline"]), Duration::from_secs(60)).ok();
/// assert!(cache.get("news_AAPL").is_some());
/// ```
pub struct MemoryCache {
    lru: Mutex<Lru>,
    config: MemoryCacheConfig,
    estimator: Arc<dyn SizeEstimator>,
    stats: AtomicCacheStats,
}

impl MemoryCache {
    /// Create a memory cache that estimates sizes by JSON encoding
    #[must_use]
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self::with_estimator(config, Arc::new(JsonCodec))
    }

    /// Create a memory cache with a custom size estimator
    #[must_use]
    pub fn with_estimator(config: MemoryCacheConfig, estimator: Arc<dyn SizeEstimator>) -> Self {
        info!(
            max_entries = config.max_entries,
            max_memory_bytes = config.max_memory_bytes,
            "Initializing Memory Cache (LRU)"
        );

        Self {
            lru: Mutex::new(Lru::default()),
            config,
            estimator,
            stats: AtomicCacheStats::default(),
        }
    }

    /// Get a live value and mark it most recently used
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut lru = self.lru.lock();

        let expired = match lru.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                self.stats.miss();
                return None;
            }
        };

        if expired {
            lru.remove(key);
            self.stats.miss();
            return None;
        }

        lru.touch(key);
        self.stats.hit();
        lru.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store a value with a time-to-live, evicting LRU entries as needed
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::EntryTooLarge`] when the value alone exceeds the
    /// byte budget; the cache is left untouched.
    ///
    /// A TTL above [`MAX_TTL`] is clamped to it.
    pub fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> CacheResult<()> {
        let size = self.estimate_size(key, &value);

        if size > self.config.max_memory_bytes {
            self.stats.error();
            return Err(CacheError::EntryTooLarge {
                key: key.to_string(),
                size,
                budget: self.config.max_memory_bytes,
            });
        }

        let mut lru = self.lru.lock();

        // An overwrite releases the old footprint before eviction runs
        lru.remove(key);

        let mut evicted = 0usize;
        while lru.entries.len() >= self.config.max_entries
            || lru.memory_bytes + size > self.config.max_memory_bytes
        {
            if lru.evict_oldest().is_none() {
                break;
            }
            evicted += 1;
        }

        lru.entries.insert(key.to_string(), CacheEntry::new(value, ttl, size));
        lru.memory_bytes += size;
        drop(lru);

        self.stats.set();
        if evicted > 0 {
            debug!(key = %key, evicted, "[Memory] Evicted LRU entries");
        }
        debug!(key = %key, ttl_secs = ttl.as_secs(), size, "[Memory] Cached key with TTL");
        Ok(())
    }

    /// Remove a key
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.lru.lock().remove(key).is_some();
        if removed {
            self.stats.delete();
        }
        removed
    }

    /// Remove every key, returning how many were held
    pub fn clear(&self) -> usize {
        let mut lru = self.lru.lock();
        let count = lru.entries.len();
        lru.entries.clear();
        lru.memory_bytes = 0;
        count
    }

    /// Remove every key matching a glob pattern
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`] for a malformed pattern.
    pub fn clear_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let pattern = KeyPattern::parse(pattern)?;
        if pattern.is_match_all() {
            return Ok(self.clear());
        }
        let mut lru = self.lru.lock();

        let doomed: Vec<String> = lru
            .entries
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();

        for key in &doomed {
            lru.remove(key);
        }

        debug!(pattern = %pattern, count = doomed.len(), "[Memory] Cleared keys matching pattern");
        Ok(doomed.len())
    }

    /// Live keys matching a glob pattern, least recently used first
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`] for a malformed pattern.
    pub fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        Ok(self.describe_keys(pattern)?.into_iter().map(|info| info.key).collect())
    }

    /// Live keys matching a glob pattern with their remaining TTL and size
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`] for a malformed pattern.
    pub fn describe_keys(&self, pattern: &str) -> CacheResult<Vec<KeyInfo>> {
        let pattern = KeyPattern::parse(pattern)?;
        let match_all = pattern.is_match_all();
        let lru = self.lru.lock();

        Ok(lru
            .entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && (match_all || pattern.matches(key)))
            .map(|(key, entry)| KeyInfo {
                key: key.clone(),
                ttl_remaining: entry.ttl_remaining().as_secs(),
                size_bytes: entry.size_bytes,
                age_seconds: entry.created_at.elapsed().as_secs(),
            })
            .collect())
    }

    /// Sweep every expired entry (should be called periodically)
    pub fn cleanup_expired(&self) -> usize {
        let mut lru = self.lru.lock();
        let before = lru.entries.len();
        let mut freed = 0usize;

        lru.entries.retain(|_, entry| {
            if entry.is_expired() {
                freed += entry.size_bytes;
                false
            } else {
                true
            }
        });
        lru.memory_bytes -= freed;

        let removed = before - lru.entries.len();
        if removed > 0 {
            debug!(count = removed, "[Memory] Cleaned up expired entries");
        }
        removed
    }

    /// Number of entries currently held (expired ones included until swept)
    #[must_use]
    pub fn len(&self) -> usize {
        self.lru.lock().entries.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lru.lock().entries.is_empty()
    }

    /// Estimated footprint of all entries, in bytes
    #[must_use]
    pub fn memory_usage_bytes(&self) -> usize {
        self.lru.lock().memory_bytes
    }

    /// Estimated footprint of all entries, in megabytes
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn memory_usage_mb(&self) -> f64 {
        self.memory_usage_bytes() as f64 / BYTES_PER_MB as f64
    }

    #[must_use]
    pub fn config(&self) -> MemoryCacheConfig {
        self.config
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn estimate_size(&self, key: &str, value: &serde_json::Value) -> usize {
        match self.estimator.estimate(value) {
            Ok(size) => size,
            Err(e) => {
                warn!(key = %key, error = %e, "[Memory] Size estimation failed, using default size");
                self.stats.error();
                DEFAULT_ENTRY_SIZE
            }
        }
    }
}
