//! Backend Traits
//!
//! The seams between the cache manager / rate-limit service and the concrete
//! storage behind them.
//!
//! # Architecture
//!
//! - `CacheCodec`: Encoding of cache values for the distributed tier
//! - `SizeEstimator`: Footprint estimate used by the Tier-1 byte budget
//! - `DistributedBackend`: Tier-2 cache (shared across server instances)
//! - `RateLimitBackend`: Fixed-window counter store (local or distributed)
//!
//! # Example: Custom Tier-2 Backend
//!
//! ```rust,ignore
//! use briefing_cache::{DistributedBackend, ClearOutcome, CacheStats, async_trait};
//! use std::time::Duration;
//!
//! struct MyStore { /* ... */ }
//!
//! #[async_trait]
//! impl DistributedBackend for MyStore {
//!     async fn connect(&self) -> bool { /* ... */ }
//!     async fn get(&self, key: &str) -> Option<serde_json::Value> { /* ... */ }
//!     // ... remaining methods
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;

use crate::rate_limit::{RateLimitResult, RateLimitStats};
use crate::stats::CacheStats;

/// Trait for cache value serialization/deserialization
///
/// Implementations must be `Send + Sync + Debug` to support concurrent access
/// across async tasks.
pub trait CacheCodec: Send + Sync + Debug {
    /// Serialize a value to bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding of `T`.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Codec name for logging
    fn name(&self) -> &'static str;
}

/// Estimated in-memory footprint of a cache value
///
/// Tier-1 charges every entry against its byte budget using this estimate.
/// An estimator failure never fails the write: the cache falls back to
/// [`DEFAULT_ENTRY_SIZE`](crate::backends::memory_cache::DEFAULT_ENTRY_SIZE)
/// and counts a tier error.
pub trait SizeEstimator: Send + Sync {
    /// Estimate the size of `value` in bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be measured.
    fn estimate(&self, value: &serde_json::Value) -> Result<usize>;
}

/// Result of clearing a whole tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum ClearOutcome {
    /// Exactly this many keys were removed
    Exact(usize),
    /// The tier was flushed but cannot report how many keys it held
    Unknown,
}

/// Distributed (Tier-2) cache backend
///
/// Every operation degrades instead of failing: while disconnected, reads
/// return `None`, writes return `false`, counts return zero. Implementations
/// log and count their own errors and schedule their own reconnects; nothing
/// here may block the caller on a reconnect.
#[async_trait]
pub trait DistributedBackend: Send + Sync {
    /// Establish the connection
    ///
    /// Failure is logged and leaves the backend disconnected.
    async fn connect(&self) -> bool;

    /// Release the connection
    async fn disconnect(&self);

    /// Whether the backend currently holds a live connection
    fn is_connected(&self) -> bool;

    /// Get value by key
    async fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Store value with time-to-live
    async fn set(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> bool;

    /// Remove value by key
    async fn delete(&self, key: &str) -> bool;

    /// Remove every key
    async fn clear(&self) -> ClearOutcome;

    /// Remove every key matching a glob pattern
    async fn clear_pattern(&self, pattern: &str) -> usize;

    /// List keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> Vec<String>;

    /// Round-trip liveness check
    async fn ping(&self) -> bool;

    /// Counter snapshot
    fn stats(&self) -> CacheStats;

    /// Backend name for stats and logging
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Fixed-window rate-limit counter store
///
/// `check` increments the identifier's counter and reports the outcome in a
/// single atomic step: two concurrent checks can never both see the last
/// remaining slot.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Count one request for `identifier` and decide whether it is allowed
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store is unreachable.
    async fn check(&self, identifier: &str, limit: u32, window_seconds: u64) -> Result<RateLimitResult>;

    /// Drop the identifier's window early
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store is unreachable.
    async fn reset(&self, identifier: &str) -> Result<bool>;

    /// Counter snapshot
    fn stats(&self) -> RateLimitStats;

    /// Backend name for status reporting
    fn name(&self) -> &'static str;

    /// Release any connection held by the backend
    async fn close(&self) {}
}
