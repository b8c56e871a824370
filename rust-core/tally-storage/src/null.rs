// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A repository that stores nothing. Useful for checking the HTTP wiring
// without any persistence behind it.

use async_trait::async_trait;

use crate::counter::Counter;
use crate::error::StorageError;
use crate::repository::Repository;

/// Every operation succeeds and every `get` reports the key as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRepository;

impl NullRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Repository for NullRepository {
    async fn get(&self, _key: &str) -> Result<Option<Counter>, StorageError> {
        Ok(None)
    }

    async fn create(&self, _key: &str, _counter: Counter) -> Result<(), StorageError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn increment(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn decrement(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_forgotten() {
        let repo = NullRepository::new();
        repo.create("/x", Counter::issue()).await.unwrap();
        repo.increment("/x").await.unwrap();
        assert_eq!(repo.get("/x").await.unwrap(), None);
        repo.delete("/x").await.unwrap();
        repo.close().await.unwrap();
    }
}
