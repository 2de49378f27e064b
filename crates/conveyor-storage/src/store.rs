//! The `KeyValueStore` trait: the substrate contract.
//!
//! The orchestrator needs exactly this much from its substrate: a string
//! KV store with existence tests, append-only lists with a range read,
//! and named FIFO queues with blocking pop. All cross-process
//! coordination goes through an implementation of this trait.

use std::time::Duration;

use async_trait::async_trait;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The substrate connection failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Key-value, list and queue operations over the shared substrate.
///
/// Single-key writes and list appends are atomic in the backing store;
/// nothing here offers multi-key transactions, and the coordinator does
/// not need them.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a value, overwriting any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Whether a key exists, regardless of its type.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Append a value to the list under `key`, creating the list if needed.
    async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// The full contents of the list under `key`, oldest first.
    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Append a payload to the FIFO queue named `queue`.
    async fn queue_push(&self, queue: &str, payload: &str) -> Result<(), StoreError>;

    /// Pop the oldest payload from `queue`, blocking up to `timeout`.
    /// A zero timeout blocks indefinitely. Returns `None` on timeout.
    async fn queue_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError>;
}

/// Namespaced substrate key for a work queue.
pub(crate) fn queue_key(queue: &str) -> String {
    format!("conveyor:queue:{queue}")
}
