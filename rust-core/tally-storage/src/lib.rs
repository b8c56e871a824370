// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tally Counter Repository Abstraction
//
// This crate provides the storage contract behind the Tally counter service.
// The `Repository` trait defines keyed get/create/delete/increment/decrement
// over `Counter` records, and each backend implements it over a different
// medium so the HTTP layer never depends on a concrete store.
//
// # Modules
//
// - [`repository`] -- The `Repository` trait and the `UpdateMode` knob.
// - [`counter`] -- The `Counter` record and its JSON record codec.
// - [`error`] -- The `StorageError` enum covering all backend failure modes.
// - [`memory`] -- In-process map, atomic per key.
// - [`disk`] -- One JSON file per key under a base directory.
// - [`null`] -- Stores nothing; every key is absent.
// - `redb_backend` -- Embedded transactional store (feature `redb-backend`).
// - `redis_backend` -- External cache store (feature `redis-backend`).
// - `etcd` -- Consensus-backed store (feature `etcd-backend`).
//
// # Example
//
// ```rust
// use tally_storage::{Counter, MemoryRepository, Repository};
//
// # tokio_test::block_on(async {
// let repo = MemoryRepository::new();
// assert!(repo.get("/visits").await.unwrap().is_none());
//
// let created = Counter::issue();
// repo.create("/visits", created).await.unwrap();
// repo.increment("/visits").await.unwrap();
//
// let current = repo.get("/visits").await.unwrap().unwrap();
// assert_eq!(current.count, 1);
// assert_eq!(current.access_key, created.access_key);
// # });
// ```

pub mod counter;
pub mod disk;
pub mod error;
pub mod memory;
pub mod null;
pub mod repository;

// Backends with heavy client dependencies are feature-gated.
#[cfg(feature = "etcd-backend")]
pub mod etcd;
#[cfg(feature = "redb-backend")]
pub mod redb_backend;
#[cfg(feature = "redis-backend")]
pub mod redis_backend;

// Re-export the most commonly used types at the crate root for convenience.
pub use counter::Counter;
pub use disk::DiskRepository;
pub use error::StorageError;
pub use memory::MemoryRepository;
pub use null::NullRepository;
pub use repository::{retry_swaps, Repository, Swap, UpdateMode, DEFAULT_CAS_RETRIES};

#[cfg(feature = "etcd-backend")]
pub use etcd::EtcdRepository;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbRepository;
#[cfg(feature = "redis-backend")]
pub use redis_backend::RedisRepository;
