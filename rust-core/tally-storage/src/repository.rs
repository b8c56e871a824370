// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core repository trait for Tally.
//
// Defines the `Repository` contract every backend satisfies: keyed get,
// create, delete, increment, decrement and close. Backends are shared by
// every request task for the lifetime of the process, so they must be
// `Send + Sync` and fully asynchronous.

use std::future::Future;

use async_trait::async_trait;
use tracing::debug;

use crate::counter::Counter;
use crate::error::StorageError;

/// Default number of attempts for [`UpdateMode::CompareAndSwap`].
pub const DEFAULT_CAS_RETRIES: u32 = 16;

/// A pluggable counter store keyed by opaque resource paths.
///
/// Absence is never an error: `get` returns `Ok(None)` for keys that were
/// never created or have been deleted, and `increment`/`decrement` on such
/// keys succeed without writing anything.
///
/// `create` does not check for an existing counter. Callers that need
/// create-if-absent semantics call `get` first; two racing creators can both
/// pass that check and the last write wins.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Fetch the counter stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Counter>, StorageError>;

    /// Store `counter` under `key`, overwriting anything already there.
    async fn create(&self, key: &str, counter: Counter) -> Result<(), StorageError>;

    /// Remove the counter under `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Add one to the counter under `key`.
    async fn increment(&self, key: &str) -> Result<(), StorageError>;

    /// Subtract one from the counter under `key`.
    async fn decrement(&self, key: &str) -> Result<(), StorageError>;

    /// Release connections and file handles. Called once at shutdown.
    async fn close(&self) -> Result<(), StorageError>;

    /// A human-readable name for this backend, used in logging.
    fn name(&self) -> &str;
}

/// How the external-store backends apply increment and decrement.
///
/// Stores without a native atomic counter perform a remote read followed by
/// a remote write. Under [`UpdateMode::ReadModifyWrite`] concurrent updates
/// from different processes can overwrite each other. [`UpdateMode::CompareAndSwap`]
/// makes the write conditional on the record being unchanged since the read
/// and retries on conflict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Plain read then write. Lost updates are possible.
    #[default]
    ReadModifyWrite,
    /// Conditional write, retried up to `max_retries` times.
    CompareAndSwap {
        /// Attempts before reporting [`StorageError::Contention`].
        max_retries: u32,
    },
}

/// Result of one conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Swap {
    /// The write went through, or there was nothing to write.
    Applied,
    /// The record changed between the read and the write.
    Lost,
}

/// Run `attempt` until it applies, at most `max_retries` times (and at least
/// once).
///
/// Returns [`StorageError::Contention`] when every attempt loses.
pub async fn retry_swaps<F, Fut>(
    key: &str,
    max_retries: u32,
    mut attempt: F,
) -> Result<(), StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Swap, StorageError>>,
{
    let attempts = max_retries.max(1);
    for n in 1..=attempts {
        if attempt().await? == Swap::Applied {
            return Ok(());
        }
        debug!(key, attempt = n, "compare-and-swap lost a race");
    }
    Err(StorageError::Contention {
        key: key.to_string(),
        attempts,
    })
}
