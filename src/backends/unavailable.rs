//! Unavailable Backend - Tier-2 without a client library

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::stats::CacheStats;
use crate::traits::{ClearOutcome, DistributedBackend};

/// Distributed tier that can never connect
///
/// Selected when the crate is built without the `redis` feature, so a
/// configured distributed mode degrades to Tier-1 only instead of failing.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    url: String,
}

impl UnavailableBackend {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl DistributedBackend for UnavailableBackend {
    async fn connect(&self) -> bool {
        warn!(redis_url = %self.url, "Distributed cache client library missing, running without distributed tier");
        false
    }

    async fn disconnect(&self) {}

    fn is_connected(&self) -> bool {
        false
    }

    async fn get(&self, _key: &str) -> Option<serde_json::Value> {
        None
    }

    async fn set(&self, _key: &str, _value: &serde_json::Value, _ttl: Duration) -> bool {
        false
    }

    async fn delete(&self, _key: &str) -> bool {
        false
    }

    async fn clear(&self) -> ClearOutcome {
        ClearOutcome::Exact(0)
    }

    async fn clear_pattern(&self, _pattern: &str) -> usize {
        0
    }

    async fn keys(&self, _pattern: &str) -> Vec<String> {
        Vec::new()
    }

    async fn ping(&self) -> bool {
        false
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}
