//! Redis Cache - Distributed Cache Backend (Tier-2)
//!
//! Shared cache used across server instances. The backend never fails the
//! caller: while disconnected every command short-circuits, and connectivity
//! errors hand recovery to a background reconnect task.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, RedisResult};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::RedisCacheConfig;
use super::memory_cache::MAX_TTL;
use crate::codecs::JsonCodec;
use crate::stats::{AtomicCacheStats, CacheStats};
use crate::traits::{CacheCodec, ClearOutcome, DistributedBackend};

/// Keys fetched per SCAN iteration, and keys per DEL
const SCAN_BATCH: usize = 100;

/// Open a `ConnectionManager` and confirm it answers PING within `timeout`
///
/// # Errors
///
/// Returns an error if the URL is invalid, the server is unreachable, or the
/// handshake does not finish in time.
pub(crate) async fn open_connection(url: &str, timeout: Duration) -> Result<ConnectionManager> {
    let client = Client::open(url)
        .with_context(|| format!("Failed to create Redis client with URL: {url}"))?;

    let mut conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
        .await
        .context("Timed out establishing Redis connection")?
        .context("Failed to establish Redis connection manager")?;

    let _: String = tokio::time::timeout(timeout, redis::cmd("PING").query_async(&mut conn))
        .await
        .context("Redis PING timed out")?
        .context("Redis PING health check failed")?;

    Ok(conn)
}

/// Whether a command failure means the connection itself is gone
fn is_connectivity_error(e: &RedisError) -> bool {
    e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error()
}

struct Shared {
    config: RedisCacheConfig,
    conn: RwLock<Option<ConnectionManager>>,
    connected: AtomicBool,
    closed: AtomicBool,
    reconnecting: AtomicBool,
    reconnect_attempts: AtomicU32,
    permits: Semaphore,
    stats: AtomicCacheStats,
}

impl Shared {
    fn connection(&self) -> Option<ConnectionManager> {
        if !self.connected.load(Ordering::Acquire) {
            return None;
        }
        self.conn.read().clone()
    }

    async fn establish(&self) -> bool {
        match open_connection(&self.config.url, self.config.socket_timeout).await {
            Ok(conn) => {
                *self.conn.write() = Some(conn);
                self.connected.store(true, Ordering::Release);
                info!(redis_url = %self.config.url, "Redis Cache connected successfully");
                true
            }
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                warn!(redis_url = %self.config.url, error = %format!("{e:#}"), "Redis Cache connection failed, running without distributed tier");
                false
            }
        }
    }

    fn mark_lost(self: &Arc<Self>) {
        if self.connected.swap(false, Ordering::AcqRel) {
            *self.conn.write() = None;
            warn!(redis_url = %self.config.url, "[Redis] Connection lost");
        }

        if self.closed.load(Ordering::Acquire) || self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        tokio::spawn(reconnect_loop(Arc::clone(self)));
    }
}

/// Background reconnect with exponential backoff, bounded by the policy's
/// attempt count. Exits early once anything else restores the connection.
async fn reconnect_loop(shared: Arc<Shared>) {
    let policy = shared.config.reconnect;

    loop {
        let attempt = shared.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if attempt > policy.max_attempts {
            warn!(
                attempts = policy.max_attempts,
                "[Redis] Reconnect attempts exhausted, staying disconnected until connect() is called"
            );
            break;
        }

        let delay = policy.delay_for(attempt);
        info!(attempt, delay_secs = delay.as_secs_f64(), "[Redis] Scheduling reconnect");
        tokio::time::sleep(delay).await;

        if shared.closed.load(Ordering::Acquire) || shared.connected.load(Ordering::Acquire) {
            break;
        }
        if shared.establish().await {
            shared.reconnect_attempts.store(0, Ordering::Relaxed);
            break;
        }
    }

    shared.reconnecting.store(false, Ordering::Release);
}

/// Redis distributed cache
///
/// Values are encoded by the cache's [`CacheCodec`] (JSON unless another is
/// injected) and stored with `SET EX`. Pattern operations use cursor-based
/// `SCAN`, never `KEYS`. At most `max_connections` commands are in flight at
/// once, each bounded by `socket_timeout`.
pub struct RedisCache<C: CacheCodec = JsonCodec> {
    shared: Arc<Shared>,
    codec: C,
}

impl RedisCache {
    /// Create a disconnected JSON-encoded Redis cache; call
    /// [`connect`](DistributedBackend::connect)
    #[must_use]
    pub fn new(config: RedisCacheConfig) -> Self {
        Self::with_codec(config, JsonCodec)
    }
}

impl<C: CacheCodec> RedisCache<C> {
    /// Create a disconnected Redis cache that encodes values with `codec`
    #[must_use]
    pub fn with_codec(config: RedisCacheConfig, codec: C) -> Self {
        info!(
            redis_url = %config.url,
            max_connections = config.max_connections,
            codec = codec.name(),
            "Initializing Redis Cache"
        );

        let permits = Semaphore::new(config.max_connections.max(1));
        Self {
            codec,
            shared: Arc::new(Shared {
                config,
                conn: RwLock::new(None),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                permits,
                stats: AtomicCacheStats::default(),
            }),
        }
    }

    #[must_use]
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Run one command against the live connection
    ///
    /// Returns `None` when disconnected, on error, or on timeout. Failures are
    /// counted and logged here; connectivity failures also schedule a reconnect.
    async fn run<T, F, Fut>(&self, op: &'static str, command: F) -> Option<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.shared.connection()?;
        let _permit = self.shared.permits.acquire().await.ok()?;

        match tokio::time::timeout(self.shared.config.socket_timeout, command(conn)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.shared.stats.error();
                warn!(op, error = %e, "[Redis] Command failed");
                if is_connectivity_error(&e) {
                    self.shared.mark_lost();
                }
                None
            }
            Err(_) => {
                self.shared.stats.error();
                warn!(op, timeout_secs = self.shared.config.socket_timeout.as_secs_f64(), "[Redis] Command timed out");
                self.shared.mark_lost();
                None
            }
        }
    }

    /// Scan keys matching a glob pattern (`SCAN MATCH`, batches of 100)
    ///
    /// Each `SCAN` round trip is its own command with its own timeout. A
    /// failure part way through returns the keys gathered so far.
    pub async fn scan_keys(&self, pattern: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let page = self
                .run("SCAN", |mut conn| async move {
                    let page: (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;
                    Ok(page)
                })
                .await;

            let Some((next, batch)) = page else {
                if cursor != 0 {
                    warn!(pattern = %pattern, scanned = keys.len(), "[Redis] Scan interrupted, keeping partial result");
                }
                break;
            };

            keys.extend(batch);
            cursor = next;

            // Cursor 0 means iteration is complete
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, count = keys.len(), "[Redis] Scanned keys matching pattern");
        keys
    }

    /// Remove keys with one `DEL` per batch of 100
    pub async fn remove_bulk(&self, keys: &[String]) -> usize {
        let mut count = 0;

        for batch in keys.chunks(SCAN_BATCH) {
            match self
                .run("DEL", |mut conn| async move { conn.del::<_, usize>(batch).await })
                .await
            {
                Some(removed) => count += removed,
                None => break,
            }
        }

        if count > 0 {
            debug!(count, "[Redis] Removed keys in bulk");
        }
        count
    }
}

// ===== Trait Implementations =====

#[async_trait]
impl<C: CacheCodec> DistributedBackend for RedisCache<C> {
    async fn connect(&self) -> bool {
        self.shared.closed.store(false, Ordering::Release);
        self.shared.reconnect_attempts.store(0, Ordering::Relaxed);
        self.shared.establish().await
    }

    async fn disconnect(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.connected.store(false, Ordering::Release);
        *self.shared.conn.write() = None;
        info!(redis_url = %self.shared.config.url, "Redis Cache disconnected");
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let raw = self
            .run("GET", |mut conn| async move { conn.get::<_, Option<Vec<u8>>>(key).await })
            .await?;

        let Some(raw) = raw else {
            self.shared.stats.miss();
            return None;
        };

        match self.codec.deserialize::<serde_json::Value>(&raw) {
            Ok(value) => {
                self.shared.stats.hit();
                Some(value)
            }
            Err(e) => {
                self.shared.stats.error();
                warn!(key = %key, codec = self.codec.name(), error = %e, "[Redis] Failed to decode stored value");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> bool {
        let payload = match self.codec.serialize(value) {
            Ok(payload) => payload,
            Err(e) => {
                self.shared.stats.error();
                warn!(key = %key, codec = self.codec.name(), error = %e, "[Redis] Failed to encode value");
                return false;
            }
        };

        // SET EX rejects a zero expiry
        let ttl_secs = ttl.min(MAX_TTL).as_secs().max(1);
        let stored = self
            .run("SET", |mut conn| async move {
                let _: () = conn.set_ex(key, payload, ttl_secs).await?;
                Ok(())
            })
            .await
            .is_some();

        if stored {
            self.shared.stats.set();
            debug!(key = %key, ttl_secs, "[Redis] Cached key with TTL");
        }
        stored
    }

    async fn delete(&self, key: &str) -> bool {
        let removed = self
            .run("DEL", |mut conn| async move { conn.del::<_, usize>(key).await })
            .await
            .is_some_and(|count| count > 0);

        if removed {
            self.shared.stats.delete();
        }
        removed
    }

    async fn clear(&self) -> ClearOutcome {
        let flushed = self
            .run("FLUSHDB", |mut conn| async move {
                let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
                Ok(())
            })
            .await
            .is_some();

        if flushed {
            info!("[Redis] Flushed database");
            ClearOutcome::Unknown
        } else {
            ClearOutcome::Exact(0)
        }
    }

    async fn clear_pattern(&self, pattern: &str) -> usize {
        let keys = self.scan_keys(pattern).await;
        let count = self.remove_bulk(&keys).await;
        debug!(pattern = %pattern, count, "[Redis] Cleared keys matching pattern");
        count
    }

    async fn keys(&self, pattern: &str) -> Vec<String> {
        self.scan_keys(pattern).await
    }

    async fn ping(&self) -> bool {
        self.run("PING", |mut conn| async move {
            let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(reply)
        })
        .await
        .is_some_and(|reply| reply == "PONG")
    }

    fn stats(&self) -> CacheStats {
        self.shared.stats.snapshot()
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
