//! In-memory implementation of [`KeyValueStore`] for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::store::{queue_key, KeyValueStore, StoreError};

#[derive(Default)]
struct Inner {
    values: HashMap<String, String>,
    lists: HashMap<String, Vec<String>>,
    queues: HashMap<String, VecDeque<String>>,
}

/// In-memory store with the same semantics as the Redis implementation.
///
/// Primarily for tests: it backs coordinator and emitter tests without a
/// running substrate.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    queued: Arc<Notify>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads currently sitting in `queue`.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(&queue_key(queue))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Drain every payload currently sitting in `queue`.
    pub fn drain_queue(&self, queue: &str) -> Vec<String> {
        self.inner
            .lock()
            .queues
            .get_mut(&queue_key(queue))
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.values.contains_key(key) || inner.lists.contains_key(key))
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().lists.get(key).cloned().unwrap_or_default())
    }

    async fn queue_push(&self, queue: &str, payload: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .queues
            .entry(queue_key(queue))
            .or_default()
            .push_back(payload.to_string());
        self.queued.notify_waiters();
        Ok(())
    }

    async fn queue_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let deadline = (!timeout.is_zero()).then(|| tokio::time::Instant::now() + timeout);
        loop {
            if let Some(payload) = self
                .inner
                .lock()
                .queues
                .get_mut(&queue_key(queue))
                .and_then(VecDeque::pop_front)
            {
                return Ok(Some(payload));
            }

            // Bounded waits: a notification can slip in between the pop
            // attempt and the wait registration, so never sleep unbounded
            // on the notifier alone.
            let mut wait = Duration::from_millis(50);
            if let Some(deadline) = deadline {
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                wait = wait.min(deadline - now);
            }
            let _ = tokio::time::timeout(wait, self.queued.notified()).await;
        }
    }
}
