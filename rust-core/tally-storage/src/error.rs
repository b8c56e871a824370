// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage error types for the Tally repository abstraction.
//
// One enum covers every way a backend can fail: local I/O, record
// (de)serialization, unreachable remote stores, keys that cannot be mapped
// onto the medium, and compare-and-swap retry exhaustion. A missing key is
// deliberately absent from this list: absence is reported as `Ok(None)`.

use thiserror::Error;

/// Errors that can occur when interacting with a counter repository.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred in the underlying storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize a counter record.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The stored data is corrupted or in an unexpected format.
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    /// The storage backend is not available (e.g., connection lost).
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The key cannot be represented by this backend.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A compare-and-swap update kept losing to concurrent writers.
    #[error("contention on key {key}: gave up after {attempts} attempts")]
    Contention {
        /// Key being updated.
        key: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The requested backend was not compiled into this build.
    #[error("unsupported backend: {0}")]
    Unsupported(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = StorageError::from(io_err);
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_invalid_key_display() {
        let err = StorageError::InvalidKey("..".to_string());
        assert_eq!(err.to_string(), "invalid key: ..");
    }

    #[test]
    fn test_contention_display() {
        let err = StorageError::Contention {
            key: "/hits".to_string(),
            attempts: 16,
        };
        assert!(err.to_string().contains("/hits"));
        assert!(err.to_string().contains("16"));
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_slice::<u32>(b"nope").unwrap_err();
        let err = StorageError::from(json_err);
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
