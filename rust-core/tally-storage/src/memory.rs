// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory counter repository.
//
// A `HashMap` behind a tokio `RwLock`. Reads share the lock; every write,
// including the whole fetch-adjust-store of increment and decrement, holds
// it exclusively, so single-key operations are atomic. Counters are kept as
// typed values and never serialized.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::counter::Counter;
use crate::error::StorageError;
use crate::repository::Repository;

/// An in-process counter store. All data is lost on drop.
///
/// Cloning is cheap and clones share the same map.
///
/// # Example
///
/// ```rust
/// use tally_storage::{Counter, MemoryRepository, Repository};
///
/// # tokio_test::block_on(async {
/// let repo = MemoryRepository::new();
/// repo.create("/hits", Counter::issue()).await.unwrap();
/// repo.increment("/hits").await.unwrap();
/// assert_eq!(repo.get("/hits").await.unwrap().unwrap().count, 1);
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    data: Arc<RwLock<HashMap<String, Counter>>>,
}

impl MemoryRepository {
    /// Create a new, empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the number of counters currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Return true if no counters are stored.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    async fn adjust(&self, key: &str, delta: i64) -> Result<(), StorageError> {
        let mut map = self.data.write().await;
        if let Some(counter) = map.get_mut(key) {
            *counter = counter.adjusted(delta);
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get(&self, key: &str) -> Result<Option<Counter>, StorageError> {
        let map = self.data.read().await;
        Ok(map.get(key).copied())
    }

    async fn create(&self, key: &str, counter: Counter) -> Result<(), StorageError> {
        let mut map = self.data.write().await;
        map.insert(key.to_string(), counter);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut map = self.data.write().await;
        map.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<(), StorageError> {
        self.adjust(key, 1).await
    }

    async fn decrement(&self, key: &str) -> Result<(), StorageError> {
        self.adjust(key, -1).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample() -> Counter {
        Counter::new(42, Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_basic_crud() {
        let repo = MemoryRepository::new();

        // Initially empty.
        assert!(repo.is_empty().await);
        assert_eq!(repo.get("key").await.unwrap(), None);

        let value = sample();
        repo.create("key", value).await.unwrap();
        assert_eq!(repo.get("key").await.unwrap(), Some(value));
        assert_eq!(repo.len().await, 1);

        repo.delete("key").await.unwrap();
        assert_eq!(repo.get("key").await.unwrap(), None);
        assert!(repo.is_empty().await);

        // Deleting again is not an error.
        repo.delete("key").await.unwrap();
    }

    #[tokio::test]
    async fn test_increment_and_decrement() {
        let repo = MemoryRepository::new();
        let value = sample();
        repo.create("key", value).await.unwrap();

        repo.increment("key").await.unwrap();
        assert_eq!(repo.get("key").await.unwrap(), Some(value.adjusted(1)));

        repo.decrement("key").await.unwrap();
        repo.decrement("key").await.unwrap();
        assert_eq!(repo.get("key").await.unwrap(), Some(value.adjusted(-1)));
    }

    #[tokio::test]
    async fn test_increment_missing_key_writes_nothing() {
        let repo = MemoryRepository::new();
        repo.increment("ghost").await.unwrap();
        repo.decrement("ghost").await.unwrap();
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let repo = MemoryRepository::new();
        repo.create("/race", Counter::issue()).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..200 {
            let repo = repo.clone();
            tasks.spawn(async move { repo.increment("/race").await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(repo.get("/race").await.unwrap().unwrap().count, 200);
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let repo = MemoryRepository::new();
        let clone = repo.clone();

        repo.create("shared", sample()).await.unwrap();
        assert!(clone.get("shared").await.unwrap().is_some());
    }
}
