// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
//! Bearer-token authentication for counter mutations.
//!
//! Each counter carries its own access key, handed out once in the
//! `Authorization: Bearer <token>` header of the create response. Every
//! mutating request must present that token again; nothing is cached
//! between requests.
//!
//! | request header                         | outcome |
//! |----------------------------------------|---------|
//! | absent                                 | 401     |
//! | no `Bearer ` prefix, or not a UUID     | 400     |
//! | well-formed but not the counter's key  | 401     |

use axum::http::{header, HeaderMap};
use tracing::warn;
use uuid::Uuid;

use tally_storage::Counter;

use crate::ApiError;

/// Authorization scheme prefix, including the separating space.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Render a token as an `Authorization` header value.
pub fn bearer_value(token: &Uuid) -> String {
    format!("{BEARER_PREFIX}{token}")
}

/// Parse the bearer token out of the request headers.
pub fn extract_token(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let Some(raw) = headers.get(header::AUTHORIZATION) else {
        return Err(ApiError::Unauthorized("Missing access token".to_string()));
    };

    let invalid = || ApiError::BadRequest("Invalid access token".to_string());
    let raw = raw.to_str().map_err(|_| invalid())?;
    let token = raw.strip_prefix(BEARER_PREFIX).ok_or_else(invalid)?;
    Uuid::parse_str(token.trim()).map_err(|_| invalid())
}

/// Check that the request presents `counter`'s access key.
pub fn authenticate(headers: &HeaderMap, counter: &Counter) -> Result<(), ApiError> {
    let token = extract_token(headers)?;
    if token != counter.access_key {
        warn!("rejected request with wrong access token");
        return Err(ApiError::Unauthorized("Wrong access token".to_string()));
    }
    Ok(())
}
