// SPDX-License-Identifier: PMPL-1.0-or-later
//! End-to-end tests: a live server on a loopback socket, driven over HTTP.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use tally_storage::{DiskRepository, MemoryRepository, Repository};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use common::{Call, RecordingRepository};

struct Server {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), tally_api::ServeError>>,
}

impl Server {
    async fn start(repository: Arc<dyn Repository>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let state = tally_api::AppState::new(repository);
        let handle = tokio::spawn(tally_api::run(listener, state, async {
            let _ = stopped.await;
        }));
        Self { addr, stop, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn shutdown(self) {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

/// Walk one counter through its whole lifecycle.
async fn exercise_lifecycle(server: &Server, key: &str) {
    let client = Client::new();

    let created = client.post(server.url(key)).send().await.unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let auth = created.headers()[header::AUTHORIZATION]
        .to_str()
        .unwrap()
        .to_string();
    let body: Value = created.json().await.unwrap();
    assert_eq!(body[key], 0);
    assert_eq!(auth, format!("Bearer {}", body["AccessKey"].as_str().unwrap()));

    let again = client.post(server.url(key)).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    for expected in 1..=3 {
        let reply = client
            .put(server.url(key))
            .header(header::AUTHORIZATION, &auth)
            .send()
            .await
            .unwrap();
        assert_eq!(reply.status(), StatusCode::OK);
        let body: Value = reply.json().await.unwrap();
        assert_eq!(body, json!({ key: expected }));
    }

    let reply = client
        .patch(server.url(key))
        .header(header::AUTHORIZATION, &auth)
        .json(&json!({ "op": "decrement" }))
        .send()
        .await
        .unwrap();
    let body: Value = reply.json().await.unwrap();
    assert_eq!(body, json!({ key: 2 }));

    let denied = client.put(server.url(key)).send().await.unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let reply = client.get(server.url(key)).send().await.unwrap();
    let body: Value = reply.json().await.unwrap();
    assert_eq!(body, json!({ key: 2 }));

    let reply = client
        .delete(server.url(key))
        .header(header::AUTHORIZATION, &auth)
        .send()
        .await
        .unwrap();
    assert_eq!(reply.status(), StatusCode::OK);

    let reply = client.get(server.url(key)).send().await.unwrap();
    assert_eq!(reply.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_lifecycle_memory() {
    let server = Server::start(Arc::new(MemoryRepository::new())).await;
    exercise_lifecycle(&server, "/e2e/memory").await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_disk() {
    let dir = tempfile::tempdir().unwrap();
    let repo = DiskRepository::open(dir.path()).await.unwrap();
    let server = Server::start(Arc::new(repo)).await;
    exercise_lifecycle(&server, "/e2e/disk").await;
    server.shutdown().await;
}

#[cfg(feature = "redb-backend")]
#[tokio::test]
async fn test_lifecycle_redb() {
    let dir = tempfile::tempdir().unwrap();
    let repo = tally_storage::RedbRepository::open(dir.path().join("counters.redb")).unwrap();
    let server = Server::start(Arc::new(repo)).await;
    exercise_lifecycle(&server, "/e2e/redb").await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_root_greeting() {
    let server = Server::start(Arc::new(MemoryRepository::new())).await;

    let text = reqwest::get(server.url("/")).await.unwrap().text().await.unwrap();
    assert!(text.starts_with("Hello World!\nBuild: "));
    assert!(text.ends_with('\n'));

    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_increments_over_http() {
    let server = Server::start(Arc::new(MemoryRepository::new())).await;
    let client = Client::new();

    let created = client.post(server.url("/hits")).send().await.unwrap();
    let auth = created.headers()[header::AUTHORIZATION]
        .to_str()
        .unwrap()
        .to_string();

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let client = client.clone();
        let url = server.url("/hits");
        let auth = auth.clone();
        tasks.push(tokio::spawn(async move {
            client
                .put(url)
                .header(header::AUTHORIZATION, auth)
                .send()
                .await
                .unwrap()
                .status()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }

    let body: Value = client
        .get(server.url("/hits"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "/hits": 50 }));

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_repository_once() {
    let repo = RecordingRepository::new();
    let server = Server::start(repo.clone()).await;

    let reply = reqwest::get(server.url("/")).await.unwrap();
    assert_eq!(reply.status(), StatusCode::OK);

    server.shutdown().await;
    assert_eq!(repo.count(|c| *c == Call::Close), 1);
}
