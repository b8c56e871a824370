// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The persisted counter record and its on-the-wire encoding.
//
// Every backend except the in-process map stores counters as a compact JSON
// object with `Count` and `AccessKey` fields. The field names match records
// written by earlier deployments of the service, so existing data stays
// readable after an upgrade.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// A counter and the access token required to mutate it.
///
/// A `Counter` has no identity of its own; it is addressed by the resource
/// key it is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Counter {
    /// Current value. Starts at 0 and may go negative.
    pub count: i64,
    /// Token that must be presented to mutate or delete this counter.
    pub access_key: Uuid,
}

impl Counter {
    /// Build a counter with an explicit count and token.
    pub fn new(count: i64, access_key: Uuid) -> Self {
        Self { count, access_key }
    }

    /// Mint a fresh counter: count 0 and a newly generated random token.
    pub fn issue() -> Self {
        Self::new(0, Uuid::new_v4())
    }

    /// Return a copy with `count` moved by `delta`, saturating at the
    /// bounds of `i64`. The token is never changed.
    pub fn adjusted(self, delta: i64) -> Self {
        Self {
            count: self.count.saturating_add(delta),
            ..self
        }
    }
}

/// Serialize a counter for storage.
pub fn encode(counter: &Counter) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(counter)?)
}

/// Deserialize a stored counter record.
///
/// A record carrying the nil token is the logical-delete marker older
/// deployments wrote in place of a real delete, so it decodes as absent.
pub fn decode(bytes: &[u8]) -> Result<Option<Counter>, StorageError> {
    let counter: Counter = serde_json::from_slice(bytes)
        .map_err(|e| StorageError::Serialization(format!("failed to decode counter: {e}")))?;
    if counter.access_key.is_nil() {
        return Ok(None);
    }
    Ok(Some(counter))
}
