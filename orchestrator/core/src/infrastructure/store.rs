// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::store::{CoordinationStore, StoreError};

/// Coordination store backed by the per-scan Redis instance.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisCoordinationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCoordinationStore").finish_non_exhaustive()
    }
}

impl RedisCoordinationStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        info!("Connecting to coordination store at {}", url);
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }
}

fn command_err(e: redis::RedisError) -> StoreError {
    StoreError::Command(e.to_string())
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key).await.map_err(command_err)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(command_err)
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.incr::<_, _, i64>(key, by).await.map_err(command_err)
    }

    async fn set_flag(&self, key: &str) -> Result<(), StoreError> {
        self.set(key, "1").await
    }

    async fn is_flag_set(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.exists::<_, bool>(key).await.map_err(command_err)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

/// Process-local store for tests and single-process runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCoordinationStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self.entries.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.entries.write().await;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let mut guard = self.entries.write().await;
        let current = match guard.get(key) {
            Some(value) => value.parse::<i64>().map_err(|_| {
                StoreError::Command(format!("value at {} is not an integer", key))
            })?,
            None => 0,
        };
        let next = current + by;
        guard.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn set_flag(&self, key: &str) -> Result<(), StoreError> {
        self.set(key, "1").await
    }

    async fn is_flag_set(&self, key: &str) -> Result<bool, StoreError> {
        let guard = self.entries.read().await;
        Ok(guard.contains_key(key))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::store::completion_key;

    #[tokio::test]
    async fn test_incr_counts_from_zero() {
        let store = InMemoryCoordinationStore::new();
        assert_eq!(store.incr("dedup:host", 1).await.unwrap(), 1);
        assert_eq!(store.incr("dedup:host", 4).await.unwrap(), 5);
        assert_eq!(store.get("dedup:host").await.unwrap().as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let store = InMemoryCoordinationStore::new();
        store.set("k", "abc").await.unwrap();
        assert!(matches!(store.incr("k", 1).await, Err(StoreError::Command(_))));
    }

    #[tokio::test]
    async fn test_flags_and_last_write_wins() {
        let store = InMemoryCoordinationStore::new();
        let key = completion_key("scan-1");
        assert!(!store.is_flag_set(&key).await.unwrap());
        store.set_flag(&key).await.unwrap();
        assert!(store.is_flag_set(&key).await.unwrap());

        store.set("k", "a").await.unwrap();
        store.set("k", "b").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = InMemoryCoordinationStore::new();
        let other = store.clone();
        other.set("shared", "yes").await.unwrap();
        assert_eq!(store.get("shared").await.unwrap().as_deref(), Some("yes"));
    }
}
