//! Cache Errors
//!
//! Typed errors for the caller-visible failure cases. Backend faults are not
//! represented here: the tiers absorb and log them.

use thiserror::Error;

/// Errors surfaced by the cache tiers and the cache manager
#[derive(Debug, Error)]
pub enum CacheError {
    /// Glob pattern could not be parsed
    #[error("invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    /// A single value is larger than the whole Tier-1 byte budget
    #[error("entry '{key}' is {size} bytes, larger than the {budget} byte memory budget")]
    EntryTooLarge { key: String, size: usize, budget: usize },

    /// Typed values could not be converted to or from JSON
    #[error("failed to convert cached value for '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result alias for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;
