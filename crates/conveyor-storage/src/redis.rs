//! Redis implementation of [`KeyValueStore`].

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::store::{queue_key, KeyValueStore, StoreError};

/// Redis-backed store. Cheap to clone; the connection manager multiplexes
/// and reconnects underneath.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to the substrate at the given URL.
    pub async fn from_url(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.set(key, value).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.rpush(key, value).await?)
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, 0, -1).await?)
    }

    async fn queue_push(&self, queue: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.rpush(queue_key(queue), payload).await?)
    }

    async fn queue_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        // BLPOP with timeout 0 blocks until a payload arrives.
        let popped: Option<(String, String)> = conn
            .blpop(queue_key(queue), timeout.as_secs_f64())
            .await?;
        Ok(popped.map(|(_key, payload)| payload))
    }
}
