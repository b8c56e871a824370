// SPDX-License-Identifier: PMPL-1.0-or-later
//! Counter request handlers.
//!
//! Each handler runs the lifecycle for the counter named by the request
//! path: look it up, authorize, mutate, then re-read for the response. The
//! existence check and the mutation are separate repository calls, so two
//! concurrent creates of the same absent key can both succeed; the later
//! write wins.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, instrument};

use tally_storage::Counter;

use crate::auth;
use crate::{ApiError, AppState};

/// Response body key carrying the token on creation.
pub const ACCESS_KEY_FIELD: &str = "AccessKey";

/// PATCH body: `{"op": "increment"}` or `{"op": "decrement"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Increment,
    Decrement,
}

#[derive(Debug, Deserialize)]
pub struct PatchRequest {
    pub op: PatchOp,
}

/// `{"<key>": <count>}`
pub fn count_body(key: &str, count: i64) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert(key.to_string(), Value::from(count));
    body
}

fn not_found() -> ApiError {
    ApiError::NotFound("Counter not yet created".to_string())
}

impl AppState {
    /// Fetch an existing counter or fail with 404.
    async fn require(&self, key: &str) -> Result<Counter, ApiError> {
        self.repository.get(key).await?.ok_or_else(not_found)
    }

    /// Re-read a counter after a mutation and render it.
    async fn render(&self, key: &str) -> Result<Json<Map<String, Value>>, ApiError> {
        let counter = self.require(key).await?;
        Ok(Json(count_body(key, counter.count)))
    }
}

/// GET: current count, never the token.
#[instrument(skip(state))]
pub async fn get_counter(
    State(state): State<AppState>,
    uri: Uri,
) -> Result<Json<Map<String, Value>>, ApiError> {
    state.render(uri.path()).await
}

/// POST: create with a fresh token, 409 if the counter already exists.
#[instrument(skip(state))]
pub async fn create_counter(
    State(state): State<AppState>,
    uri: Uri,
) -> Result<impl IntoResponse, ApiError> {
    let key = uri.path();
    if state.repository.get(key).await?.is_some() {
        return Err(ApiError::Conflict("Counter already exists".to_string()));
    }

    let counter = Counter::issue();
    state.repository.create(key, counter).await?;
    info!(key, "counter created");

    let mut body = count_body(key, counter.count);
    body.insert(
        ACCESS_KEY_FIELD.to_string(),
        Value::String(counter.access_key.to_string()),
    );

    Ok((
        StatusCode::CREATED,
        [(header::AUTHORIZATION, auth::bearer_value(&counter.access_key))],
        Json(body),
    ))
}

/// PUT: increment by one.
#[instrument(skip(state, headers))]
pub async fn increment_counter(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<Map<String, Value>>, ApiError> {
    let key = uri.path();
    let counter = state.require(key).await?;
    auth::authenticate(&headers, &counter)?;

    state.repository.increment(key).await?;
    state.render(key).await
}

/// PATCH: increment or decrement as named by the body.
///
/// The token is checked before the body is parsed.
#[instrument(skip(state, headers, body))]
pub async fn patch_counter(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Map<String, Value>>, ApiError> {
    let key = uri.path();
    let counter = state.require(key).await?;
    auth::authenticate(&headers, &counter)?;

    let request: PatchRequest = serde_json::from_slice(&body).map_err(|e| {
        ApiError::BadRequest(format!(
            "expected {{\"op\": \"increment\" | \"decrement\"}}: {e}"
        ))
    })?;

    match request.op {
        PatchOp::Increment => state.repository.increment(key).await?,
        PatchOp::Decrement => state.repository.decrement(key).await?,
    }
    state.render(key).await
}

/// DELETE: remove the counter.
#[instrument(skip(state, headers))]
pub async fn delete_counter(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let key = uri.path();
    let counter = state.require(key).await?;
    auth::authenticate(&headers, &counter)?;

    state.repository.delete(key).await?;
    info!(key, "counter deleted");
    Ok(StatusCode::OK)
}
