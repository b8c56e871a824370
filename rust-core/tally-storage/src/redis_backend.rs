// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Redis-backed counter repository.
//
// Counters are stored as JSON strings under their resource key. Presence is
// checked with EXISTS before the GET so a missing key is never confused with
// a stored record. Increment and decrement are a GET followed by a SET; with
// `UpdateMode::CompareAndSwap` the SET becomes a server-side script that only
// writes if the record still holds the bytes that were read.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, RedisError, Script};
use tracing::info;

use crate::counter::{self, Counter};
use crate::error::StorageError;
use crate::repository::{retry_swaps, Repository, Swap, UpdateMode};

/// Time allowed for the initial connection.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Reconnect attempts after the connection drops.
const MAX_RETRIES: usize = 5;

/// Time allowed for any single command.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Set KEYS[1] to ARGV[2] only if it currently equals ARGV[1].
const COMPARE_AND_SET: &str = r"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
";

fn unavailable(err: RedisError) -> StorageError {
    StorageError::BackendUnavailable(format!("redis: {err}"))
}

/// Accept either a bare `host:port` or a full `redis://` URL.
pub fn redis_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{addr}")
    }
}

/// A repository backed by a single Redis server.
///
/// The connection manager reconnects on its own after failures; a command
/// issued while disconnected fails immediately with
/// [`StorageError::BackendUnavailable`].
pub struct RedisRepository {
    conn: ConnectionManager,
    mode: UpdateMode,
    compare_and_set: Script,
    addr: String,
}

impl RedisRepository {
    /// Connect to the Redis server at `addr`.
    pub async fn connect(addr: &str, mode: UpdateMode) -> Result<Self, StorageError> {
        let url = redis_url(addr);
        let client = redis::Client::open(url.as_str()).map_err(unavailable)?;
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(MAX_RETRIES)
            .set_connection_timeout(DIAL_TIMEOUT)
            .set_response_timeout(RESPONSE_TIMEOUT);
        let conn = tokio::time::timeout(
            DIAL_TIMEOUT,
            ConnectionManager::new_with_config(client, config),
        )
        .await
        .map_err(|_| StorageError::BackendUnavailable(format!("redis: timed out connecting to {url}")))?
        .map_err(unavailable)?;

        info!(addr = %url, ?mode, "connected to redis backend");

        Ok(Self {
            conn,
            mode,
            compare_and_set: Script::new(COMPARE_AND_SET),
            addr: url,
        })
    }

    async fn put(&self, key: &str, counter: &Counter) -> Result<(), StorageError> {
        let bytes = counter::encode(counter)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, bytes).await.map_err(unavailable)
    }

    async fn adjust(&self, key: &str, delta: i64) -> Result<(), StorageError> {
        match self.mode {
            UpdateMode::ReadModifyWrite => {
                if let Some(current) = self.get(key).await? {
                    self.put(key, &current.adjusted(delta)).await?;
                }
                Ok(())
            }
            UpdateMode::CompareAndSwap { max_retries } => {
                retry_swaps(key, max_retries, || self.try_swap(key, delta)).await
            }
        }
    }

    /// One conditional update: read the raw record, then write the adjusted
    /// record only if the stored bytes are still the ones that were read.
    async fn try_swap(&self, key: &str, delta: i64) -> Result<Swap, StorageError> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = conn.get(key).await.map_err(unavailable)?;
        let Some(raw) = raw else {
            return Ok(Swap::Applied);
        };
        let Some(current) = counter::decode(&raw)? else {
            return Ok(Swap::Applied);
        };
        let next = counter::encode(&current.adjusted(delta))?;

        let swapped: i32 = self
            .compare_and_set
            .key(key)
            .arg(raw)
            .arg(next)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(if swapped == 1 { Swap::Applied } else { Swap::Lost })
    }
}

impl std::fmt::Debug for RedisRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRepository")
            .field("addr", &self.addr)
            .field("mode", &self.mode)
            .finish()
    }
}

#[async_trait]
impl Repository for RedisRepository {
    async fn get(&self, key: &str) -> Result<Option<Counter>, StorageError> {
        let mut conn = self.conn.clone();
        let present: bool = conn.exists(key).await.map_err(unavailable)?;
        if !present {
            return Ok(None);
        }
        let raw: Option<Vec<u8>> = conn.get(key).await.map_err(unavailable)?;
        match raw {
            Some(bytes) => counter::decode(&bytes),
            // Deleted between EXISTS and GET.
            None => Ok(None),
        }
    }

    async fn create(&self, key: &str, counter: Counter) -> Result<(), StorageError> {
        self.put(key, &counter).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(unavailable)
    }

    async fn increment(&self, key: &str) -> Result<(), StorageError> {
        self.adjust(key, 1).await
    }

    async fn decrement(&self, key: &str) -> Result<(), StorageError> {
        self.adjust(key, -1).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        // The connection manager closes its socket when the last clone drops.
        info!(addr = %self.addr, "closing redis backend");
        Ok(())
    }

    fn name(&self) -> &str {
        "redis"
    }
}
