//! Cache Manager - Unified Cache Operations
//!
//! Composes the in-process Tier-1 cache with an optional distributed Tier-2
//! behind one interface. The manager owns stampede prevention, statistics and
//! health reporting; Tier-2 trouble never reaches its callers.
//!
//! # Interfaces
//!
//! - **Synchronous** (`get`, `set`, `delete`, `clear`): Tier-1 only, never
//!   suspend. Tier-2 follows through the background propagation queue.
//! - **Suspending** (`aget`, `aset`, `adelete`, `aclear`): read-through and
//!   write-through across both tiers.
//! - **Single-flight** (`get_or_set`, `get_or_set_typed`): at most one
//!   producer invocation per key at a time.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::backends::{KeyInfo, MemoryCache, MemoryCacheConfig, RedisCacheConfig, distributed_backend};
use crate::error::{CacheError, CacheResult};
use crate::pattern::KeyPattern;
use crate::propagation::{DEFAULT_QUEUE_CAPACITY, PropagationTask, Propagator};
use crate::stampede::{KeyLockTable, LockTableConfig};
use crate::stats::{CacheStats, ratio};
use crate::traits::{ClearOutcome, DistributedBackend};

/// Which tiers the manager runs with, fixed at initialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Tier-1 only; Tier-2 is never constructed
    #[default]
    Memory,
    /// Distributed store as the authoritative copy, fronted by Tier-1
    Redis,
    /// Tier-1 hot copy over Tier-2
    Layered,
}

impl BackendMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
            Self::Layered => "layered",
        }
    }

    /// Whether this mode constructs a Tier-2
    #[must_use]
    pub fn uses_distributed(self) -> bool {
        !matches!(self, Self::Memory)
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "layered" => Ok(Self::Layered),
            other => Err(format!("unknown cache backend '{other}' (expected memory, redis or layered)")),
        }
    }
}

/// A cache tier addressed by `aclear`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    #[serde(rename = "l1")]
    Tier1,
    #[serde(rename = "l2")]
    Tier2,
}

impl Layer {
    pub const ALL: [Self; 2] = [Self::Tier1, Self::Tier2];
}

/// Cache manager settings
#[derive(Debug, Clone)]
pub struct CacheManagerConfig {
    pub mode: BackendMode,
    pub tier1: MemoryCacheConfig,
    pub redis: RedisCacheConfig,
    pub stampede_prevention: bool,
    /// Bound on the Tier-2 lookup inside `aget`
    pub tier2_timeout: Duration,
    /// Floor of the Tier-1 TTL written by `aset`
    pub tier1_min_ttl: Duration,
    /// `aset` keeps `ttl / divisor` in Tier-1 while Tier-2 is live
    pub tier1_ttl_divisor: u32,
    /// TTL of a Tier-1 copy backfilled from a Tier-2 hit
    pub backfill_ttl: Duration,
    pub propagation_capacity: usize,
    pub locks: LockTableConfig,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::Memory,
            tier1: MemoryCacheConfig::default(),
            redis: RedisCacheConfig::default(),
            stampede_prevention: true,
            tier2_timeout: Duration::from_secs(1),
            tier1_min_ttl: Duration::from_secs(60),
            tier1_ttl_divisor: 5,
            backfill_ttl: Duration::from_secs(60),
            propagation_capacity: DEFAULT_QUEUE_CAPACITY,
            locks: LockTableConfig::default(),
        }
    }
}

/// Per-tier statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStats {
    pub backend: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub hit_rate: f64,
    /// Known for Tier-1 only; counting distributed keys needs a full scan
    pub key_count: Option<usize>,
    pub memory_usage_mb: Option<f64>,
    pub connected: bool,
}

impl TierStats {
    fn new(backend: &'static str, stats: CacheStats, connected: bool) -> Self {
        Self {
            backend,
            hits: stats.hits,
            misses: stats.misses,
            sets: stats.sets,
            deletes: stats.deletes,
            errors: stats.errors,
            hit_rate: stats.hit_rate(),
            key_count: None,
            memory_usage_mb: None,
            connected,
        }
    }
}

/// Manager-wide statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheManagerStats {
    pub tier1: TierStats,
    pub tier2: Option<TierStats>,
    /// `(t1 hits + t2 hits) / (t1 lookups + t2 lookups)`
    pub combined_hit_rate: f64,
    pub uptime_seconds: f64,
    pub last_cleared: Option<DateTime<Utc>>,
    pub backend_mode: BackendMode,
    /// Per-key locks currently tracked
    pub stampede_locks: usize,
    /// Tier-2 tasks discarded by a full propagation queue
    pub propagation_dropped: u64,
}

/// Overall health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Tier-2 configured but unreachable; Tier-1 keeps serving
    Degraded,
    Unhealthy,
}

/// Result of [`CacheManager::health_check`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub tier1_status: &'static str,
    pub tier2_status: Option<&'static str>,
    pub tier2_connected: bool,
    pub message: String,
}

/// Result of [`CacheManager::aclear`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    /// Keys removed; a full Tier-2 flush contributes a nominal 1
    pub cleared: usize,
    /// False when a tier could not report how many keys it removed
    pub exact: bool,
}

/// Work done by one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired_entries: usize,
    pub pruned_locks: usize,
}

/// Cache Manager - unified operations across Tier-1 and Tier-2
pub struct CacheManager {
    config: CacheManagerConfig,
    tier1: Arc<MemoryCache>,
    tier2: Option<Arc<dyn DistributedBackend>>,
    propagator: Option<Propagator>,
    locks: KeyLockTable,
    started_at: Instant,
    last_cleared: RwLock<Option<DateTime<Utc>>>,
}

impl CacheManager {
    /// Build the manager for the configured mode
    ///
    /// In the distributed modes the Tier-2 connect is attempted once; failure
    /// is logged and the manager serves from Tier-1 alone.
    pub async fn initialize(config: CacheManagerConfig) -> Self {
        let tier2 = config
            .mode
            .uses_distributed()
            .then(|| distributed_backend(config.redis.clone()));
        Self::with_backend(config, tier2).await
    }

    /// Build the manager around an explicit Tier-2 backend
    pub async fn with_backend(config: CacheManagerConfig, tier2: Option<Arc<dyn DistributedBackend>>) -> Self {
        if let Some(tier2) = &tier2 {
            if !tier2.connect().await {
                warn!(backend = tier2.name(), "Tier-2 unavailable, continuing with Tier-1 only");
            }
        }

        let propagator = tier2
            .as_ref()
            .map(|tier2| Propagator::spawn(Arc::clone(tier2), config.propagation_capacity));

        info!(
            backend = %config.mode,
            tier2 = tier2.as_ref().map_or("none", |t| t.name()),
            stampede_prevention = config.stampede_prevention,
            "Cache Manager initialized"
        );

        Self {
            tier1: Arc::new(MemoryCache::new(config.tier1)),
            locks: KeyLockTable::new(config.locks),
            config,
            tier2,
            propagator,
            started_at: Instant::now(),
            last_cleared: RwLock::new(None),
        }
    }

    /// Drain pending Tier-2 propagation and release the connection
    pub async fn shutdown(&self) {
        if let Some(propagator) = &self.propagator {
            propagator.shutdown().await;
        }
        if let Some(tier2) = &self.tier2 {
            tier2.disconnect().await;
        }
        info!("Cache Manager shut down");
    }

    // ===== Synchronous interface (Tier-1 only) =====

    /// Get a value from Tier-1
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.tier1.get(key)
    }

    /// Store in Tier-1 and queue the Tier-2 write
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::EntryTooLarge`] if the value exceeds the Tier-1
    /// byte budget; nothing is queued in that case.
    pub fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> CacheResult<()> {
        if self.live_tier2().is_some() {
            self.tier1.set(key, value.clone(), ttl)?;
            self.propagate(PropagationTask::Set {
                key: key.to_string(),
                value,
                ttl,
            });
        } else {
            self.tier1.set(key, value, ttl)?;
        }
        Ok(())
    }

    /// Remove from Tier-1 and queue the Tier-2 delete
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.tier1.delete(key);
        if self.live_tier2().is_some() {
            self.propagate(PropagationTask::Delete { key: key.to_string() });
        }
        removed
    }

    /// Empty Tier-1 and queue a Tier-2 flush
    pub fn clear(&self) -> usize {
        let removed = self.tier1.clear();
        if self.live_tier2().is_some() {
            self.propagate(PropagationTask::Clear);
        }
        self.mark_cleared();
        removed
    }

    // ===== Suspending interface =====

    /// Tier-1, then Tier-2 within the configured timeout
    ///
    /// A Tier-2 hit is copied into Tier-1 with the short backfill TTL. A Tier-2
    /// timeout or error counts as a miss.
    pub async fn aget(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(value) = self.tier1.get(key) {
            return Some(value);
        }

        let tier2 = self.live_tier2()?;
        match tokio::time::timeout(self.config.tier2_timeout, tier2.get(key)).await {
            Ok(Some(value)) => {
                if let Err(e) = self.tier1.set(key, value.clone(), self.config.backfill_ttl) {
                    debug!(key = %key, error = %e, "Tier-2 value not backfilled into Tier-1");
                }
                Some(value)
            }
            Ok(None) => None,
            Err(_) => {
                warn!(key = %key, timeout_secs = self.config.tier2_timeout.as_secs_f64(), "Tier-2 lookup timed out");
                None
            }
        }
    }

    /// Write Tier-1 (short TTL) and Tier-2 (full TTL)
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::EntryTooLarge`] if the value exceeds the Tier-1
    /// byte budget. Tier-2 failures are logged, never returned.
    pub async fn aset(&self, key: &str, value: serde_json::Value, ttl: Duration) -> CacheResult<()> {
        let Some(tier2) = self.live_tier2() else {
            return self.tier1.set(key, value, ttl);
        };

        let local = self.tier1.set(key, value.clone(), self.tier1_ttl(ttl));
        if !tier2.set(key, &value, ttl).await {
            debug!(key = %key, "Tier-2 write not applied");
        }
        local
    }

    /// Remove from both tiers
    pub async fn adelete(&self, key: &str) -> bool {
        let mut removed = self.tier1.delete(key);
        if let Some(tier2) = self.live_tier2() {
            removed |= tier2.delete(key).await;
        }
        removed
    }

    /// Clear by pattern (or entirely) in each requested layer
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`] for a malformed pattern; no layer
    /// is touched in that case.
    pub async fn aclear(&self, pattern: Option<&str>, layers: &[Layer]) -> CacheResult<ClearReport> {
        let pattern = pattern.map(KeyPattern::parse).transpose()?;
        let mut report = ClearReport { cleared: 0, exact: true };

        if layers.contains(&Layer::Tier1) {
            report.cleared += match &pattern {
                Some(pattern) => self.tier1.clear_pattern(pattern.as_str())?,
                None => self.tier1.clear(),
            };
        }

        if layers.contains(&Layer::Tier2) {
            if let Some(tier2) = self.live_tier2() {
                match &pattern {
                    Some(pattern) => report.cleared += tier2.clear_pattern(pattern.as_str()).await,
                    None => match tier2.clear().await {
                        ClearOutcome::Exact(count) => report.cleared += count,
                        ClearOutcome::Unknown => {
                            report.cleared += 1;
                            report.exact = false;
                        }
                    },
                }
            }
        }

        self.mark_cleared();
        info!(
            pattern = pattern.as_ref().map_or("*", KeyPattern::as_str),
            cleared = report.cleared,
            "Cache cleared"
        );
        Ok(report)
    }

    // ===== Single-flight population =====

    /// Return the cached value, or produce, store and return it
    ///
    /// Concurrent callers for one key wait on a per-key lock; after acquiring
    /// it they re-check the cache, so `producer` runs at most once per miss.
    ///
    /// # Errors
    ///
    /// Returns the producer's error unchanged. The lock is released and
    /// nothing is cached.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use briefing_cache::{CacheManager, CacheManagerConfig};
    /// # use std::time::Duration;
    /// # async fn example(cache: &CacheManager) -> anyhow::Result<()> {
    /// let news = cache
    ///     .get_or_set("news_AAPL", || async { Ok(serde_json::json!(["headline"])) }, Duration::from_secs(900))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_or_set<F, Fut>(&self, key: &str, producer: F, ttl: Duration) -> anyhow::Result<serde_json::Value>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
    {
        if let Some(value) = self.aget(key).await {
            return Ok(value);
        }

        if !self.config.stampede_prevention {
            let value = producer().await?;
            self.store_produced(key, value.clone(), ttl).await;
            return Ok(value);
        }

        self.locks.maybe_prune();
        let _guard = self.locks.acquire(key).await;

        // Another caller may have filled the key while we waited
        if let Some(value) = self.aget(key).await {
            self.locks.touch(key);
            return Ok(value);
        }

        debug!(key = %key, "Computing fresh value (stampede protected)");
        let value = producer().await?;
        self.store_produced(key, value.clone(), ttl).await;
        self.locks.touch(key);
        Ok(value)
    }

    /// Typed [`get_or_set`](Self::get_or_set)
    ///
    /// A cached value that does not deserialize into `T` is treated as a miss
    /// and recomputed.
    ///
    /// # Errors
    ///
    /// Returns the producer's error, or [`CacheError::Serialization`] if the
    /// produced value cannot be converted to JSON.
    pub async fn get_or_set_typed<T, F, Fut>(&self, key: &str, producer: F, ttl: Duration) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        if let Some(value) = self.aget_typed(key).await {
            return Ok(value);
        }

        let _guard = if self.config.stampede_prevention {
            self.locks.maybe_prune();
            let guard = self.locks.acquire(key).await;
            if let Some(value) = self.aget_typed(key).await {
                self.locks.touch(key);
                return Ok(value);
            }
            Some(guard)
        } else {
            None
        };

        let typed = producer().await?;
        let json = serde_json::to_value(&typed).map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.store_produced(key, json, ttl).await;
        self.locks.touch(key);
        Ok(typed)
    }

    // ===== Introspection =====

    /// Live Tier-1 keys matching `pattern`, at most `limit`
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`] for a malformed pattern.
    pub fn keys(&self, pattern: &str, limit: usize) -> CacheResult<Vec<KeyInfo>> {
        let mut keys = self.tier1.describe_keys(pattern)?;
        keys.truncate(limit);
        Ok(keys)
    }

    #[must_use]
    pub fn get_stats(&self) -> CacheManagerStats {
        let t1 = self.tier1.stats();
        let mut tier1 = TierStats::new("memory", t1, true);
        tier1.key_count = Some(self.tier1.len());
        tier1.memory_usage_mb = Some(self.tier1.memory_usage_mb());

        let t2 = self.tier2.as_ref().map(|tier2| tier2.stats()).unwrap_or_default();
        let tier2 = self
            .tier2
            .as_ref()
            .map(|backend| TierStats::new(backend.name(), t2, backend.is_connected()));

        CacheManagerStats {
            tier1,
            tier2,
            combined_hit_rate: ratio(t1.hits + t2.hits, t1.hits + t1.misses + t2.hits + t2.misses),
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            last_cleared: *self.last_cleared.read(),
            backend_mode: self.config.mode,
            stampede_locks: self.locks.len(),
            propagation_dropped: self.propagator.as_ref().map_or(0, Propagator::dropped),
        }
    }

    /// Tier-1 is always healthy; a configured but unreachable Tier-2 degrades
    pub async fn health_check(&self) -> HealthReport {
        let Some(tier2) = &self.tier2 else {
            return HealthReport {
                status: HealthStatus::Healthy,
                tier1_status: "healthy",
                tier2_status: None,
                tier2_connected: false,
                message: "Tier-1 (memory) cache operational".to_string(),
            };
        };

        let reachable = tier2.is_connected()
            && tokio::time::timeout(self.config.tier2_timeout, tier2.ping())
                .await
                .unwrap_or(false);

        if reachable {
            HealthReport {
                status: HealthStatus::Healthy,
                tier1_status: "healthy",
                tier2_status: Some("healthy"),
                tier2_connected: true,
                message: "Tier-1 + Tier-2 cache operational".to_string(),
            }
        } else {
            HealthReport {
                status: HealthStatus::Degraded,
                tier1_status: "healthy",
                tier2_status: Some("disconnected"),
                tier2_connected: false,
                message: format!("Tier-2 ({}) unavailable, serving from Tier-1 only", tier2.name()),
            }
        }
    }

    /// Sweep expired Tier-1 entries and prune the stampede lock table
    pub fn run_maintenance(&self) -> MaintenanceReport {
        MaintenanceReport {
            expired_entries: self.tier1.cleanup_expired(),
            pruned_locks: self.locks.prune(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> BackendMode {
        self.config.mode
    }

    #[must_use]
    pub fn tier1(&self) -> &MemoryCache {
        &self.tier1
    }

    #[must_use]
    pub fn is_tier2_connected(&self) -> bool {
        self.live_tier2().is_some()
    }

    #[must_use]
    pub fn stampede_prevention(&self) -> bool {
        self.config.stampede_prevention
    }

    // ===== Internals =====

    fn live_tier2(&self) -> Option<&Arc<dyn DistributedBackend>> {
        self.tier2.as_ref().filter(|tier2| tier2.is_connected())
    }

    /// Tier-1 share of a layered TTL: `max(ttl / divisor, floor)`, never above `ttl`
    fn tier1_ttl(&self, ttl: Duration) -> Duration {
        (ttl / self.config.tier1_ttl_divisor.max(1))
            .max(self.config.tier1_min_ttl)
            .min(ttl)
    }

    async fn store_produced(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        if let Err(e) = self.aset(key, value, ttl).await {
            warn!(key = %key, error = %e, "Produced value not cached");
        }
    }

    fn propagate(&self, task: PropagationTask) {
        if let Some(propagator) = &self.propagator {
            propagator.enqueue(task);
        }
    }

    fn mark_cleared(&self) {
        *self.last_cleared.write() = Some(Utc::now());
    }

    async fn aget_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cached = self.aget(key).await?;
        match serde_json::from_value(cached) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key = %key, error = %e, "Cached value does not match requested type, recomputing");
                None
            }
        }
    }
}
