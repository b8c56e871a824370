// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// etcd v3 counter repository.
//
// Every repository call is one request against the cluster (two for
// increment and decrement). A range request that returns no key-value pairs
// means the counter does not exist. Consistency is whatever etcd gives a
// single request: linearizable reads and writes, but no atomicity across the
// read and the write of an increment unless `UpdateMode::CompareAndSwap` is
// selected, in which case the write is a transaction guarded by the key's
// `mod_revision`.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, ConnectOptions, Txn, TxnOp};
use tracing::info;

use crate::counter::{self, Counter};
use crate::error::StorageError;
use crate::repository::{retry_swaps, Repository, Swap, UpdateMode};

/// Time allowed for the initial connection.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

fn unavailable(err: etcd_client::Error) -> StorageError {
    StorageError::BackendUnavailable(format!("etcd: {err}"))
}

/// A repository backed by an etcd v3 cluster.
#[derive(Clone)]
pub struct EtcdRepository {
    client: Client,
    mode: UpdateMode,
    endpoints: Vec<String>,
}

impl EtcdRepository {
    /// Connect to the cluster reachable through `endpoints`.
    pub async fn connect(endpoints: &[String], mode: UpdateMode) -> Result<Self, StorageError> {
        if endpoints.is_empty() {
            return Err(StorageError::BackendUnavailable(
                "etcd: no endpoints configured".to_string(),
            ));
        }

        let options = ConnectOptions::new().with_connect_timeout(DIAL_TIMEOUT);
        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(unavailable)?;

        info!(endpoints = ?endpoints, ?mode, "connected to etcd backend");

        Ok(Self {
            client,
            mode,
            endpoints: endpoints.to_vec(),
        })
    }

    /// Fetch the counter together with the revision it was last modified at.
    async fn fetch(&self, key: &str) -> Result<Option<(Counter, i64)>, StorageError> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await.map_err(unavailable)?;
        let Some(kv) = resp.kvs().first() else {
            return Ok(None);
        };
        Ok(counter::decode(kv.value())?.map(|c| (c, kv.mod_revision())))
    }

    async fn put(&self, key: &str, counter: &Counter) -> Result<(), StorageError> {
        let bytes = counter::encode(counter)?;
        let mut client = self.client.clone();
        client.put(key, bytes, None).await.map_err(unavailable)?;
        Ok(())
    }

    async fn adjust(&self, key: &str, delta: i64) -> Result<(), StorageError> {
        match self.mode {
            UpdateMode::ReadModifyWrite => {
                if let Some((current, _)) = self.fetch(key).await? {
                    self.put(key, &current.adjusted(delta)).await?;
                }
                Ok(())
            }
            UpdateMode::CompareAndSwap { max_retries } => {
                retry_swaps(key, max_retries, || self.try_swap(key, delta)).await
            }
        }
    }

    /// One conditional update, guarded by the revision that was read.
    async fn try_swap(&self, key: &str, delta: i64) -> Result<Swap, StorageError> {
        let Some((current, revision)) = self.fetch(key).await? else {
            return Ok(Swap::Applied);
        };
        let bytes = counter::encode(&current.adjusted(delta))?;
        let txn = Txn::new()
            .when(vec![Compare::mod_revision(key, CompareOp::Equal, revision)])
            .and_then(vec![TxnOp::put(key, bytes, None)]);

        let mut client = self.client.clone();
        let resp = client.txn(txn).await.map_err(unavailable)?;
        Ok(if resp.succeeded() { Swap::Applied } else { Swap::Lost })
    }
}

impl std::fmt::Debug for EtcdRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdRepository")
            .field("endpoints", &self.endpoints)
            .field("mode", &self.mode)
            .finish()
    }
}

#[async_trait]
impl Repository for EtcdRepository {
    async fn get(&self, key: &str) -> Result<Option<Counter>, StorageError> {
        Ok(self.fetch(key).await?.map(|(counter, _)| counter))
    }

    async fn create(&self, key: &str, counter: Counter) -> Result<(), StorageError> {
        self.put(key, &counter).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut client = self.client.clone();
        client.delete(key, None).await.map_err(unavailable)?;
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<(), StorageError> {
        self.adjust(key, 1).await
    }

    async fn decrement(&self, key: &str) -> Result<(), StorageError> {
        self.adjust(key, -1).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        // The gRPC channel shuts down once every client clone is dropped.
        info!(endpoints = ?self.endpoints, "closing etcd backend");
        Ok(())
    }

    fn name(&self) -> &str {
        "etcd3"
    }
}
