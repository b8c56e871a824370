// SPDX-License-Identifier: PMPL-1.0-or-later
//! Test doubles and helpers shared by the API tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use tally_api::{build_router, AppState};
use tally_storage::{Counter, MemoryRepository, Repository, StorageError};
use tower::ServiceExt;

/// One repository call, as observed by [`RecordingRepository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get(String),
    Create(String),
    Delete(String),
    Increment(String),
    Decrement(String),
    Close,
}

/// A memory-backed repository that logs every call and can be switched
/// into a failing mode to simulate an unreachable backend.
#[derive(Default)]
pub struct RecordingRepository {
    inner: MemoryRepository,
    calls: Mutex<Vec<Call>>,
    failing: AtomicBool,
}

impl RecordingRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a counter without recording the call.
    pub async fn seed(&self, key: &str, counter: Counter) {
        self.inner.create(key, counter).await.unwrap();
    }

    /// Read a counter without recording the call.
    pub async fn peek(&self, key: &str) -> Option<Counter> {
        self.inner.get(key).await.unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| wanted(c)).count()
    }

    /// Make every subsequent call fail.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: Call) -> Result<(), StorageError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::BackendUnavailable(
                "connection refused by 10.0.0.7:2379".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for RecordingRepository {
    async fn get(&self, key: &str) -> Result<Option<Counter>, StorageError> {
        self.record(Call::Get(key.to_string()))?;
        self.inner.get(key).await
    }

    async fn create(&self, key: &str, counter: Counter) -> Result<(), StorageError> {
        self.record(Call::Create(key.to_string()))?;
        self.inner.create(key, counter).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.record(Call::Delete(key.to_string()))?;
        self.inner.delete(key).await
    }

    async fn increment(&self, key: &str) -> Result<(), StorageError> {
        self.record(Call::Increment(key.to_string()))?;
        self.inner.increment(key).await
    }

    async fn decrement(&self, key: &str) -> Result<(), StorageError> {
        self.record(Call::Decrement(key.to_string()))?;
        self.inner.decrement(key).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.record(Call::Close)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// A repository whose every call waits forever, like a backend that
/// accepted the connection and then stopped answering.
#[derive(Debug, Default)]
pub struct HangingRepository;

#[async_trait]
impl Repository for HangingRepository {
    async fn get(&self, _key: &str) -> Result<Option<Counter>, StorageError> {
        std::future::pending().await
    }

    async fn create(&self, _key: &str, _counter: Counter) -> Result<(), StorageError> {
        std::future::pending().await
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        std::future::pending().await
    }

    async fn increment(&self, _key: &str) -> Result<(), StorageError> {
        std::future::pending().await
    }

    async fn decrement(&self, _key: &str) -> Result<(), StorageError> {
        std::future::pending().await
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

/// Router over `repo`.
pub fn app(repo: Arc<RecordingRepository>) -> Router {
    build_router(AppState::new(repo))
}

/// Status, headers and body of a response.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).unwrap()
    }
}

/// Drive one request through the router.
pub async fn send(app: &Router, request: Request<Body>) -> Reply {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    Reply {
        status,
        headers,
        body,
    }
}

/// Build a request with an optional `Authorization` value and body.
pub fn request(method: &str, uri: &str, authorization: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header("authorization", value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}
