//! Per-Key Lock Table for Stampede Prevention
//!
//! One `tokio::sync::Mutex` per key, created on first contention and pruned
//! once idle so a long-running process observing many distinct keys does not
//! grow the table without bound.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Limits of the lock table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTableConfig {
    /// Unheld locks idle longer than this are removed
    pub max_age: Duration,
    /// Above this many locks, the oldest unheld ones are removed
    pub max_locks: usize,
    /// Minimum spacing between opportunistic prunes
    pub prune_interval: Duration,
}

impl Default for LockTableConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60),
            max_locks: 1000,
            prune_interval: Duration::from_secs(300),
        }
    }
}

struct LockSlot {
    lock: Arc<AsyncMutex<()>>,
    last_used: Instant,
}

impl LockSlot {
    /// Nobody holds or waits on the lock: the table owns the only reference
    fn is_unused(&self) -> bool {
        Arc::strong_count(&self.lock) == 1
    }
}

/// Lazily populated table of per-key async locks
pub struct KeyLockTable {
    locks: DashMap<String, LockSlot>,
    config: LockTableConfig,
    last_prune: Mutex<Instant>,
}

impl KeyLockTable {
    #[must_use]
    pub fn new(config: LockTableConfig) -> Self {
        Self {
            locks: DashMap::new(),
            config,
            last_prune: Mutex::new(Instant::now()),
        }
    }

    /// Wait for exclusive access to `key`
    ///
    /// The guard owns its lock, so pruning can never free a lock that is
    /// held or awaited.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut slot = self.locks.entry(key.to_string()).or_insert_with(|| LockSlot {
                lock: Arc::new(AsyncMutex::new(())),
                last_used: Instant::now(),
            });
            slot.last_used = Instant::now();
            Arc::clone(&slot.lock)
        };

        lock.lock_owned().await
    }

    /// Record that `key`'s lock was just used
    pub fn touch(&self, key: &str) {
        if let Some(mut slot) = self.locks.get_mut(key) {
            slot.last_used = Instant::now();
        }
    }

    /// Prune unless a prune ran within the configured interval
    pub fn maybe_prune(&self) -> usize {
        {
            let last = self.last_prune.lock();
            if last.elapsed() < self.config.prune_interval {
                return 0;
            }
        }
        self.prune()
    }

    /// Remove idle locks, then the oldest ones while over the count limit
    ///
    /// Held or awaited locks are never removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        *self.last_prune.lock() = now;

        let stale: Vec<String> = self
            .locks
            .iter()
            .filter(|slot| now.duration_since(slot.last_used) > self.config.max_age)
            .map(|slot| slot.key().clone())
            .collect();

        let mut removed = stale
            .iter()
            .filter(|key| self.locks.remove_if(key.as_str(), |_, slot| slot.is_unused()).is_some())
            .count();

        let excess = self.locks.len().saturating_sub(self.config.max_locks);
        if excess > 0 {
            let mut by_age: Vec<(String, Instant)> = self
                .locks
                .iter()
                .map(|slot| (slot.key().clone(), slot.last_used))
                .collect();
            by_age.sort_by_key(|(_, last_used)| *last_used);

            removed += by_age
                .iter()
                .filter(|(key, _)| self.locks.remove_if(key.as_str(), |_, slot| slot.is_unused()).is_some())
                .take(excess)
                .count();
        }

        if removed > 0 {
            debug!(removed, remaining = self.locks.len(), "Pruned stale stampede locks");
        }
        removed
    }

    /// Number of locks currently tracked
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for KeyLockTable {
    fn default() -> Self {
        Self::new(LockTableConfig::default())
    }
}
