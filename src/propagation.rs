//! Background Tier-2 Propagation
//!
//! The synchronous manager API never awaits the distributed tier. Writes,
//! deletes and clears are queued on a bounded channel and replayed against
//! Tier-2 by a single worker task. A full queue drops the task; nothing is
//! retried.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::traits::DistributedBackend;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One deferred Tier-2 operation
#[derive(Debug, Clone, PartialEq)]
pub enum PropagationTask {
    Set {
        key: String,
        value: serde_json::Value,
        ttl: Duration,
    },
    Delete {
        key: String,
    },
    Clear,
}

impl PropagationTask {
    fn kind(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Delete { .. } => "delete",
            Self::Clear => "clear",
        }
    }
}

/// Bounded queue plus its draining worker
pub struct Propagator {
    sender: Mutex<Option<mpsc::Sender<PropagationTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl Propagator {
    /// Start the worker on the current runtime
    #[must_use]
    pub fn spawn(backend: Arc<dyn DistributedBackend>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(drain(backend, receiver));

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a task without waiting; returns whether it was accepted
    pub fn enqueue(&self, task: PropagationTask) -> bool {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            debug!(task = task.kind(), "Propagation queue closed, task discarded");
            return false;
        };

        match sender.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(task)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(task = task.kind(), "Propagation queue full, dropping Tier-2 task");
                false
            }
            Err(TrySendError::Closed(task)) => {
                debug!(task = task.kind(), "Propagation worker stopped, task discarded");
                false
            }
        }
    }

    /// Tasks discarded because the queue was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the queue and wait for the worker to drain what is left
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Propagation worker ended abnormally");
            }
        }
    }
}

async fn drain(backend: Arc<dyn DistributedBackend>, mut receiver: mpsc::Receiver<PropagationTask>) {
    while let Some(task) = receiver.recv().await {
        let kind = task.kind();
        let applied = match task {
            PropagationTask::Set { key, value, ttl } => backend.set(&key, &value, ttl).await,
            PropagationTask::Delete { key } => backend.delete(&key).await,
            PropagationTask::Clear => {
                backend.clear().await;
                true
            }
        };

        if !applied {
            debug!(task = kind, "Tier-2 propagation not applied");
        }
    }
    debug!("Propagation worker stopped");
}
