// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>
//
// redb-backed embedded counter repository.
//
// Uses redb (pure Rust, B-tree, ACID, single-file database) as the embedded
// transactional store. No C/C++ dependencies.
//
// # Design
//
// - One database file with a single `counters` table of key -> JSON record.
// - Reads run in read transactions (concurrent, lock-free).
// - create/delete run in one write transaction each.
// - increment/decrement read and write inside the same write transaction;
//   redb serialises write transactions, so updates are never lost.
// - A table that does not exist yet simply means no counter was ever
//   written; it is reported as absence, not as an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition, TableError};
use tracing::debug;

use crate::counter::{self, Counter};
use crate::error::StorageError;
use crate::repository::Repository;

/// Resource key -> encoded counter.
const COUNTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("counters");

/// A persistent repository powered by redb.
///
/// Thread-safe: `Database` is `Send + Sync` and handles internal locking.
/// Blocking database work runs on tokio's blocking pool.
pub struct RedbRepository {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbRepository {
    /// Open or create a redb database at the given path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path).map_err(|e| {
            StorageError::BackendUnavailable(format!(
                "failed to open redb at {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!(path = %path.display(), "opened redb backend");

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Return the filesystem path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` against the database on tokio's blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::BackendUnavailable(format!("task join: {e}")))?
    }

    async fn adjust(&self, key: &str, delta: i64) -> Result<(), StorageError> {
        let key = key.to_string();
        self.blocking(move |db| {
            in_write_txn(db, |table| {
                let current = match table.get(key.as_str()).map_err(|e| corrupted("get", e))? {
                    Some(bytes) => counter::decode(bytes.value())?,
                    None => None,
                };
                if let Some(current) = current {
                    let bytes = counter::encode(&current.adjusted(delta))?;
                    table
                        .insert(key.as_str(), bytes.as_slice())
                        .map_err(|e| corrupted("insert", e))?;
                }
                Ok(())
            })
        })
        .await
    }
}

type CounterTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

fn corrupted(op: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::CorruptedData(format!("{op}: {err}"))
}

/// Apply `op` to the counters table and commit, all in one write transaction.
fn in_write_txn<F>(db: &Database, op: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut CounterTable<'_>) -> Result<(), StorageError>,
{
    let txn = db
        .begin_write()
        .map_err(|e| StorageError::BackendUnavailable(format!("write txn: {e}")))?;
    {
        let mut table = txn
            .open_table(COUNTERS)
            .map_err(|e| StorageError::BackendUnavailable(format!("open table: {e}")))?;
        op(&mut table)?;
    }
    txn.commit().map_err(|e| corrupted("commit", e))
}

impl std::fmt::Debug for RedbRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRepository")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl Repository for RedbRepository {
    async fn get(&self, key: &str) -> Result<Option<Counter>, StorageError> {
        let key = key.to_string();
        self.blocking(move |db| {
            let txn = db
                .begin_read()
                .map_err(|e| StorageError::BackendUnavailable(format!("read txn: {e}")))?;

            let table = match txn.open_table(COUNTERS) {
                Ok(t) => t,
                // Nothing has been written yet.
                Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(e) => return Err(StorageError::BackendUnavailable(format!("open table: {e}"))),
            };

            let stored = table.get(key.as_str()).map_err(|e| corrupted("get", e))?;
            stored.map_or(Ok(None), |bytes| counter::decode(bytes.value()))
        })
        .await
    }

    async fn create(&self, key: &str, counter: Counter) -> Result<(), StorageError> {
        let key = key.to_string();
        let bytes = counter::encode(&counter)?;
        self.blocking(move |db| {
            in_write_txn(db, |table| {
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| corrupted("insert", e))?;
                Ok(())
            })
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        self.blocking(move |db| {
            in_write_txn(db, |table| {
                table.remove(key.as_str()).map_err(|e| corrupted("remove", e))?;
                Ok(())
            })
        })
        .await
    }

    async fn increment(&self, key: &str) -> Result<(), StorageError> {
        self.adjust(key, 1).await
    }

    async fn decrement(&self, key: &str) -> Result<(), StorageError> {
        self.adjust(key, -1).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        // Commits are durable on return; the file is released when the last
        // handle drops.
        debug!(path = %self.path.display(), "closing redb backend");
        Ok(())
    }

    fn name(&self) -> &str {
        "redb"
    }
}
