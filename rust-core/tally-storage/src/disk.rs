// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// File-per-key counter repository.
//
// # Layout
//
// Resource keys are sanitized into a single file name: the leading `/` is
// stripped and every remaining `/` becomes `-`. The first `-`-separated
// segment names a shard directory, so `/test/yeet` is stored at
// `<base>/test/test-yeet`. Each file holds one JSON-encoded counter.
//
// # Consistency
//
// Writes land in a temporary sibling and are renamed into place, so readers
// never observe a partial record. Mutations are serialized by one writer
// lock per repository instance; two processes sharing a directory get no
// coordination beyond what the filesystem's rename gives them.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::counter::{self, Counter};
use crate::error::StorageError;
use crate::repository::Repository;

/// A repository that keeps each counter in its own file under a base
/// directory.
#[derive(Debug)]
pub struct DiskRepository {
    base: PathBuf,
    writer: Mutex<()>,
}

impl DiskRepository {
    /// Open (creating if needed) a repository rooted at `base`.
    pub async fn open(base: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base).await?;
        debug!(path = %base.display(), "opened disk backend");
        Ok(Self {
            base,
            writer: Mutex::new(()),
        })
    }

    /// Root directory of this repository.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Map a resource key onto the file that stores it.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let name = sanitize_key(key)?;
        let shard = name.split('-').next().unwrap_or_default();
        let path = if shard.is_empty() {
            self.base.join(&name)
        } else {
            self.base.join(shard).join(&name)
        };
        Ok(path)
    }

    async fn read(&self, path: &Path) -> Result<Option<Counter>, StorageError> {
        match fs::read(path).await {
            Ok(bytes) => counter::decode(&bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &Path, value: &Counter) -> Result<(), StorageError> {
        let bytes = counter::encode(value)?;
        let parent = path.parent().unwrap_or(&self.base);
        fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("counter");
        let staging = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

        fs::write(&staging, &bytes).await?;
        if let Err(e) = fs::rename(&staging, path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn adjust(&self, key: &str, delta: i64) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let _guard = self.writer.lock().await;
        if let Some(current) = self.read(&path).await? {
            self.write(&path, &current.adjusted(delta)).await?;
        }
        Ok(())
    }
}

/// Longest sanitized name accepted. Leaves room for the staging suffix
/// within the usual 255-byte file name limit.
pub const MAX_NAME_LEN: usize = 200;

/// Turn a resource path into a single filesystem-safe name.
///
/// Only the whole name and its shard segment become path components, so
/// those are the parts that must not be empty, `.` or `..`.
pub fn sanitize_key(key: &str) -> Result<String, StorageError> {
    let trimmed = key.strip_prefix('/').unwrap_or(key);
    let name = trimmed.replace('/', "-");
    let shard = name.split('-').next().unwrap_or_default();

    let is_dot = |part: &str| part == "." || part == "..";
    if name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name.contains('\\')
        || name.contains('\0')
        || is_dot(name.as_str())
        || is_dot(shard)
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(name)
}

#[async_trait]
impl Repository for DiskRepository {
    async fn get(&self, key: &str) -> Result<Option<Counter>, StorageError> {
        let path = self.path_for(key)?;
        self.read(&path).await
    }

    async fn create(&self, key: &str, counter: Counter) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let _guard = self.writer.lock().await;
        self.write(&path, &counter).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let _guard = self.writer.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
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
        "disk"
    }
}
