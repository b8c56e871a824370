// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
//! Process configuration.
//!
//! Every setting is a command-line flag that falls back to an environment
//! variable, so container deployments configure the service with `DB`,
//! `DBHOST`, `DISKPATH` and `ADDRESS` alone.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;
use tracing::{info, warn};

use tally_storage::{
    DiskRepository, MemoryRepository, NullRepository, Repository, StorageError, UpdateMode,
    DEFAULT_CAS_RETRIES,
};

/// Crate version, shown by `--version`.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// File name of the redb database inside the disk path.
pub const REDB_FILE: &str = "counters.redb";

/// Which repository implementation to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// In-process map; lost on restart.
    Memory,
    /// etcd v3 cluster at `DBHOST`.
    #[value(name = "etcd3", alias = "etcd")]
    Etcd3,
    /// One file per counter under `DISKPATH`.
    Disk,
    /// Redis server at `DBHOST`.
    Redis,
    /// Embedded redb database under `DISKPATH`.
    #[value(aliases = ["embedded", "badger"])]
    Redb,
    /// Persist nothing.
    Null,
}

impl BackendKind {
    fn label(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Etcd3 => "etcd3",
            BackendKind::Disk => "disk",
            BackendKind::Redis => "redis",
            BackendKind::Redb => "redb",
            BackendKind::Null => "null",
        }
    }
}

/// How increments reach the external stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Consistency {
    /// Read then write; concurrent writers can lose updates.
    #[value(alias = "rmw")]
    ReadModifyWrite,
    /// Conditional write with retries.
    #[value(alias = "cas")]
    CompareAndSwap,
}

/// Configuration errors detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no database host(s) specified but the {0} backend requires one")]
    MissingHosts(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Tally counter service.
#[derive(Parser, Debug, Clone)]
#[command(name = "tally", version = VERSION, about = "Token-guarded counter service")]
pub struct ServerConfig {
    /// Storage backend.
    #[arg(long, env = "DB", value_enum, default_value_t = BackendKind::Memory)]
    pub db: BackendKind,

    /// Backend host(s), comma separated. Required for etcd3 and redis.
    #[arg(long = "db-host", env = "DBHOST", value_delimiter = ',')]
    pub db_hosts: Vec<String>,

    /// Directory for the disk and redb backends.
    #[arg(long, env = "DISKPATH", default_value = "./data")]
    pub disk_path: PathBuf,

    /// Listen address. `:port` listens on all interfaces.
    #[arg(long, env = "ADDRESS", default_value = ":8080")]
    pub address: String,

    /// Update strategy for the etcd3 and redis backends.
    #[arg(long, env = "CONSISTENCY", value_enum, default_value_t = Consistency::ReadModifyWrite)]
    pub consistency: Consistency,

    /// Attempts per update under compare-and-swap.
    #[arg(long, env = "CAS_RETRIES", default_value_t = DEFAULT_CAS_RETRIES)]
    pub cas_retries: u32,

    /// Seconds a request may run before it is answered with 503.
    #[arg(long = "request-timeout", env = "REQUEST_TIMEOUT", default_value_t = crate::DEFAULT_REQUEST_TIMEOUT.as_secs())]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db: BackendKind::Memory,
            db_hosts: Vec::new(),
            disk_path: PathBuf::from("./data"),
            address: ":8080".to_string(),
            consistency: Consistency::ReadModifyWrite,
            cas_retries: DEFAULT_CAS_RETRIES,
            request_timeout_secs: crate::DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl ServerConfig {
    /// Address to hand to the listener.
    pub fn bind_address(&self) -> String {
        if self.address.starts_with(':') {
            format!("0.0.0.0{}", self.address)
        } else {
            self.address.clone()
        }
    }

    /// Non-empty configured hosts.
    pub fn hosts(&self) -> Vec<String> {
        self.db_hosts
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Per-request deadline. Zero is raised to one second.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn update_mode(&self) -> UpdateMode {
        match self.consistency {
            Consistency::ReadModifyWrite => UpdateMode::ReadModifyWrite,
            Consistency::CompareAndSwap => UpdateMode::CompareAndSwap {
                max_retries: self.cas_retries,
            },
        }
    }

    /// Open the configured backend.
    pub async fn open_repository(&self) -> Result<Arc<dyn Repository>, ConfigError> {
        info!(
            backend = self.db.label(),
            address = %self.address,
            consistency = ?self.consistency,
            "opening repository"
        );

        let repository: Arc<dyn Repository> = match self.db {
            BackendKind::Memory => Arc::new(MemoryRepository::new()),
            BackendKind::Disk => {
                info!(path = %self.disk_path.display(), "using disk storage");
                Arc::new(DiskRepository::open(&self.disk_path).await?)
            }
            BackendKind::Redb => open_redb(&self.disk_path.join(REDB_FILE))?,
            BackendKind::Redis => {
                let hosts = self.require_hosts(BackendKind::Redis)?;
                if hosts.len() > 1 {
                    warn!(ignored = ?&hosts[1..], "redis backend uses only the first host");
                }
                open_redis(&hosts[0], self.update_mode()).await?
            }
            BackendKind::Etcd3 => {
                let hosts = self.require_hosts(BackendKind::Etcd3)?;
                open_etcd(&hosts, self.update_mode()).await?
            }
            BackendKind::Null => {
                warn!("null backend selected: nothing will be stored. Are you sure?");
                Arc::new(NullRepository::new())
            }
        };
        Ok(repository)
    }

    fn require_hosts(&self, kind: BackendKind) -> Result<Vec<String>, ConfigError> {
        let hosts = self.hosts();
        if hosts.is_empty() {
            return Err(ConfigError::MissingHosts(kind.label()));
        }
        Ok(hosts)
    }
}

#[cfg(not(all(
    feature = "redb-backend",
    feature = "redis-backend",
    feature = "etcd-backend"
)))]
fn not_compiled(backend: &str, feature: &str) -> StorageError {
    StorageError::Unsupported(format!(
        "{backend} (rebuild with the `{feature}` feature)"
    ))
}

#[cfg(feature = "redb-backend")]
fn open_redb(path: &Path) -> Result<Arc<dyn Repository>, StorageError> {
    Ok(Arc::new(tally_storage::RedbRepository::open(path)?))
}

#[cfg(not(feature = "redb-backend"))]
fn open_redb(_path: &Path) -> Result<Arc<dyn Repository>, StorageError> {
    Err(not_compiled("redb", "redb-backend"))
}

#[cfg(feature = "redis-backend")]
async fn open_redis(host: &str, mode: UpdateMode) -> Result<Arc<dyn Repository>, StorageError> {
    Ok(Arc::new(
        tally_storage::RedisRepository::connect(host, mode).await?,
    ))
}

#[cfg(not(feature = "redis-backend"))]
async fn open_redis(_host: &str, _mode: UpdateMode) -> Result<Arc<dyn Repository>, StorageError> {
    Err(not_compiled("redis", "redis-backend"))
}

#[cfg(feature = "etcd-backend")]
async fn open_etcd(
    hosts: &[String],
    mode: UpdateMode,
) -> Result<Arc<dyn Repository>, StorageError> {
    Ok(Arc::new(
        tally_storage::EtcdRepository::connect(hosts, mode).await?,
    ))
}

#[cfg(not(feature = "etcd-backend"))]
async fn open_etcd(
    _hosts: &[String],
    _mode: UpdateMode,
) -> Result<Arc<dyn Repository>, StorageError> {
    Err(not_compiled("etcd3", "etcd-backend"))
}
