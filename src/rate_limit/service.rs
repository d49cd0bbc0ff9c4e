//! Rate-limit service with distributed-to-local fallback

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use super::{MemoryRateLimiter, RateLimitResult, RateLimitStats};
use crate::traits::RateLimitBackend;

/// Unified limiter used by the request gate
///
/// Checks go to the distributed backend while it is healthy. The first error
/// demotes the service to the local backend for the rest of the process
/// lifetime; that call and every later one are answered locally.
pub struct RateLimitService {
    memory: Arc<MemoryRateLimiter>,
    distributed: Option<Arc<dyn RateLimitBackend>>,
    use_distributed: AtomicBool,
}

impl RateLimitService {
    /// Local-only service
    #[must_use]
    pub fn local() -> Self {
        Self {
            memory: Arc::new(MemoryRateLimiter::new()),
            distributed: None,
            use_distributed: AtomicBool::new(false),
        }
    }

    /// Service that prefers an already connected distributed backend
    #[must_use]
    pub fn with_distributed(backend: Arc<dyn RateLimitBackend>) -> Self {
        Self {
            memory: Arc::new(MemoryRateLimiter::new()),
            distributed: Some(backend),
            use_distributed: AtomicBool::new(true),
        }
    }

    /// Build the service, connecting to Redis when requested
    ///
    /// A failed connection is logged and leaves the service local-only.
    pub async fn initialize(use_redis: bool, redis_url: &str, timeout: Duration) -> Self {
        let service = if use_redis {
            match connect_distributed(redis_url, timeout).await {
                Some(backend) => Self::with_distributed(backend),
                None => {
                    warn!("Rate Limiter: Redis unavailable, falling back to memory backend");
                    Self::local()
                }
            }
        } else {
            Self::local()
        };

        info!(backend = service.backend_name(), "Rate Limit service initialized");
        service
    }

    /// Release the distributed connection, if any
    pub async fn shutdown(&self) {
        if let Some(distributed) = &self.distributed {
            distributed.close().await;
        }
        self.use_distributed.store(false, Ordering::Release);
        info!("Rate Limit service shut down");
    }

    /// Backend currently answering checks
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match self.active_distributed() {
            Some(distributed) => distributed.name(),
            None => self.memory.name(),
        }
    }

    /// The local limiter, always present
    #[must_use]
    pub fn memory(&self) -> &MemoryRateLimiter {
        &self.memory
    }

    /// Sweep window-expired entries from the local limiter
    pub fn cleanup_expired(&self, window_seconds: u64) -> usize {
        self.memory.cleanup_expired(window_seconds)
    }

    fn active_distributed(&self) -> Option<&Arc<dyn RateLimitBackend>> {
        if self.use_distributed.load(Ordering::Acquire) {
            self.distributed.as_ref()
        } else {
            None
        }
    }
}

#[cfg(feature = "redis")]
async fn connect_distributed(url: &str, timeout: Duration) -> Option<Arc<dyn RateLimitBackend>> {
    let limiter = super::RedisRateLimiter::new(url, timeout);
    if limiter.connect().await {
        Some(Arc::new(limiter))
    } else {
        None
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_distributed(url: &str, _timeout: Duration) -> Option<Arc<dyn RateLimitBackend>> {
    warn!(redis_url = %url, "Rate Limiter: Redis client library missing");
    None
}

// ===== Trait Implementations =====

#[async_trait]
impl RateLimitBackend for RateLimitService {
    async fn check(&self, identifier: &str, limit: u32, window_seconds: u64) -> Result<RateLimitResult> {
        if let Some(distributed) = self.active_distributed() {
            match distributed.check(identifier, limit, window_seconds).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Distributed rate limit failed, falling back to memory backend");
                    self.use_distributed.store(false, Ordering::Release);
                }
            }
        }

        self.memory.check(identifier, limit, window_seconds).await
    }

    /// Clears the identifier in both backends
    async fn reset(&self, identifier: &str) -> Result<bool> {
        let mut removed = self.memory.remove(identifier);

        if let Some(distributed) = &self.distributed {
            match distributed.reset(identifier).await {
                Ok(hit) => removed |= hit,
                Err(e) => warn!(identifier = %identifier, error = %format!("{e:#}"), "Distributed rate limit reset failed"),
            }
        }
        Ok(removed)
    }

    /// Sum of both backends
    fn stats(&self) -> RateLimitStats {
        let local = self.memory.stats();
        match &self.distributed {
            Some(distributed) => local + distributed.stats(),
            None => local,
        }
    }

    fn name(&self) -> &'static str {
        self.backend_name()
    }

    async fn close(&self) {
        self.shutdown().await;
    }
}
