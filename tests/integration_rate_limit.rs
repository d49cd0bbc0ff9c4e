//! Integration tests for fixed-window rate limiting

mod common;

use briefing_cache::rate_limit::{MemoryRateLimiter, RateLimitService};
use briefing_cache::{RateLimitBackend, RateLimitResult};
use common::*;
use std::sync::Arc;
use std::time::Duration;

async fn check(limiter: &dyn RateLimitBackend, identifier: &str, limit: u32, window: u64) -> RateLimitResult {
    limiter
        .check(identifier, limit, window)
        .await
        .unwrap_or_else(|e| panic!("check failed: {e}"))
}

#[tokio::test]
async fn test_fixed_window_boundary() {
    let limiter = RateLimitService::local();

    let mut remaining = Vec::new();
    for _ in 0..3 {
        let result = check(&limiter, "203.0.113.7", 3, 60).await;
        assert!(result.allowed);
        assert!(result.retry_after.is_none());
        remaining.push(result.remaining);
    }
    assert_eq!(remaining, vec![2, 1, 0]);

    let blocked = check(&limiter, "203.0.113.7", 3, 60).await;
    assert!(!blocked.allowed);
    assert_eq!(blocked.remaining, 0);
    assert!(blocked.retry_after.is_some_and(|secs| secs > 0 && secs <= 60));
}

#[tokio::test]
async fn test_window_reset() {
    let limiter = RateLimitService::local();

    assert!(check(&limiter, "user:42", 2, 1).await.allowed);
    assert!(check(&limiter, "user:42", 2, 1).await.allowed);
    assert!(!check(&limiter, "user:42", 2, 1).await.allowed);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let result = check(&limiter, "user:42", 2, 1).await;
    assert!(result.allowed);
    assert_eq!(result.remaining, 1);
}

#[tokio::test]
async fn test_independent_identifiers() {
    let limiter = RateLimitService::local();

    for _ in 0..5 {
        check(&limiter, "api_key:alpha", 5, 60).await;
    }
    assert!(!check(&limiter, "api_key:alpha", 5, 60).await.allowed);

    let other = check(&limiter, "api_key:beta", 5, 60).await;
    assert!(other.allowed);
    assert_eq!(other.remaining, 4);
}

#[tokio::test]
async fn test_reset_and_stats() {
    let limiter = RateLimitService::local();

    check(&limiter, "198.51.100.2", 1, 60).await;
    assert!(!check(&limiter, "198.51.100.2", 1, 60).await.allowed);

    let stats = limiter.stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.blocked_requests, 1);
    assert!((stats.block_rate() - 0.5).abs() < f64::EPSILON);

    assert!(limiter.reset("198.51.100.2").await.unwrap());
    assert!(check(&limiter, "198.51.100.2", 1, 60).await.allowed);
    assert!(!limiter.reset("never-seen").await.unwrap());
}

/// The first distributed failure demotes the service for good
#[tokio::test]
async fn test_service_falls_back_to_memory() {
    let failing = Arc::new(FailingLimiter::default());
    let limiter = RateLimitService::with_distributed(failing.clone());
    assert_eq!(limiter.backend_name(), "failing");

    let first = check(&limiter, "203.0.113.9", 10, 60).await;
    assert!(first.allowed);
    assert_eq!(first.remaining, 9);
    assert_eq!(limiter.backend_name(), "memory");

    let second = check(&limiter, "203.0.113.9", 10, 60).await;
    assert_eq!(second.remaining, 8);
    assert_eq!(failing.calls(), 1, "demotion is permanent");
}

/// Concurrent checks never admit more than the limit
#[tokio::test]
async fn test_concurrent_checks_respect_limit() {
    let limiter = Arc::new(MemoryRateLimiter::new());

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..200 {
        let limiter = Arc::clone(&limiter);
        tasks.spawn(async move { limiter.check("shared", 50, 60).await });
    }

    let mut allowed = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap_or_else(|_| panic!("Task panicked")).unwrap().allowed {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 50);
}

#[cfg(feature = "redis")]
#[tokio::test]
#[ignore = "requires a running Redis at REDIS_URL"]
async fn test_redis_limiter_shares_counts() {
    use briefing_cache::rate_limit::RedisRateLimiter;

    let first = RedisRateLimiter::new(redis_url(), Duration::from_secs(2));
    let second = RedisRateLimiter::new(redis_url(), Duration::from_secs(2));
    assert!(first.connect().await && second.connect().await);

    let identifier = test_key("shared_quota");
    assert_eq!(check(&first, &identifier, 2, 60).await.remaining, 1);
    assert_eq!(check(&second, &identifier, 2, 60).await.remaining, 0);
    assert!(!check(&first, &identifier, 2, 60).await.allowed);

    assert!(first.reset(&identifier).await.unwrap());
    first.close().await;
    second.close().await;
}
