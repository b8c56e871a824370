// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tally API
//!
//! HTTP front end for the Tally counter service. Every request path other
//! than `/` names an independent counter held in a [`Repository`]; the
//! handlers in [`routes`] enforce creation, ownership and bearer-token
//! authentication on top of the repository contract.

pub mod auth;
pub mod config;
pub mod routes;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use tally_storage::{Repository, StorageError};

pub use config::{BackendKind, ConfigError, Consistency, ServerConfig};

/// Build identifier reported on `/`. Set `TALLY_BUILD_ID` at compile time
/// (for example to a git hash); otherwise the crate version is used.
pub const BUILD_ID: &str = match option_env!("TALLY_BUILD_ID") {
    Some(id) => id,
    None => env!("CARGO_PKG_VERSION"),
};

/// Longest a request may take before it is answered with 503.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// API errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => {
                let body = Json(ErrorResponse {
                    error: msg,
                    code: StatusCode::UNAUTHORIZED.as_u16(),
                });
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    body,
                )
                    .into_response();
            }
            ApiError::Timeout(limit) => {
                warn!(?limit, "request timed out");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Request timed out".to_string(),
                )
            }
            ApiError::Storage(StorageError::InvalidKey(key)) => {
                warn!(%key, "rejected counter key");
                (StatusCode::BAD_REQUEST, "Invalid counter key".to_string())
            }
            ApiError::Storage(err) => {
                // Backend details stay in the log.
                error!(error = %err, "repository operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

/// Errors that stop the server from starting or shutting down cleanly.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Application state, shared by every request task.
#[derive(Clone)]
pub struct AppState {
    /// The counter store. Handlers hold no other state between requests.
    pub repository: Arc<dyn Repository>,
    /// Reported on the root path.
    pub build_id: Arc<str>,
    /// Deadline for each request, repository calls included.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            build_id: Arc::from(BUILD_ID),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Replace the build identifier shown on `/`.
    pub fn with_build_id(mut self, build_id: &str) -> Self {
        self.build_id = Arc::from(build_id);
        self
    }

    /// Replace the per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("repository", &self.repository.name())
            .field("build_id", &self.build_id)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Build the API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Greeting, any method
        .route("/", any(root_handler))
        // Every other path is a counter
        .route(
            "/{*key}",
            get(routes::get_counter)
                .post(routes::create_counter)
                .put(routes::increment_counter)
                .patch(routes::patch_counter)
                .delete(routes::delete_counter),
        )
        .layer(middleware::from_fn_with_state(state.clone(), enforce_deadline))
        .with_state(state)
}

/// Answer 503 for any request still running after the configured deadline.
/// The abandoned handler future is dropped.
async fn enforce_deadline(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match tokio::time::timeout(state.request_timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::Timeout(state.request_timeout).into_response(),
    }
}

/// Greeting plus build identifier
async fn root_handler(State(state): State<AppState>) -> String {
    format!("Hello World!\nBuild: {}\n", state.build_id)
}

/// Serve `state` on `listener` until `shutdown` resolves, then close the
/// repository.
pub async fn run<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let repository = Arc::clone(&state.repository);
    let app = build_router(state);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    info!(backend = repository.name(), "closing repository");
    let closed = repository.close().await;

    served?;
    closed?;
    Ok(())
}

/// Start the API server
pub async fn serve(config: ServerConfig) -> Result<(), ServeError> {
    let repository = config.open_repository().await?;

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, backend = repository.name(), build = BUILD_ID, "Starting Tally counter service");

    let state = AppState::new(repository).with_request_timeout(config.request_timeout());
    run(listener, state, shutdown_signal()).await
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
