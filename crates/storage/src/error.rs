//! Storage error types and result alias.
//!
//! Every [`StorageBackend`](crate::StorageBackend) implementation maps its
//! internal failures onto [`StorageError`].
//!
//! # Error Types
//!
//! - [`StorageError::NotFound`] - Key does not exist
//! - [`StorageError::Conflict`] - Compare-and-set precondition failed
//! - [`StorageError::Connection`] - The backing store could not be reached
//! - [`StorageError::Serialization`] - A stored record could not be encoded or decoded
//! - [`StorageError::Internal`] - Backend-specific failure
//! - [`StorageError::CasRetriesExhausted`] - A read-modify-write loop kept conflicting
//!
//! # Example
//!
//! ```
//! use argocd_tokens_storage::{StorageError, StorageResult};
//!
//! fn lookup(key: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::not_found(key))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via `#[source]`.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The requested key was not found.
    #[error("Key not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// The current value did not match the compare-and-set expectation.
    #[error("Write conflict on key {key}")]
    Conflict {
        /// The key whose precondition failed.
        key: String,
    },

    /// Connection or network error.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization or deserialization error.
    ///
    /// Usually indicates a corrupted record, since decoding is lenient about
    /// unknown and missing fields.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// A read-modify-write cycle conflicted on every attempt.
    #[error("Compare-and-set retries exhausted after {attempts} attempts")]
    CasRetriesExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error for the given key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `Conflict` error for the given key.
    #[must_use]
    pub fn conflict(key: impl Into<String>) -> Self {
        Self::Conflict { key: key.into() }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `CasRetriesExhausted` error.
    #[must_use]
    pub fn cas_retries_exhausted(attempts: u32) -> Self {
        Self::CasRetriesExhausted { attempts }
    }

    /// Returns `true` if the failure is transient and the operation may
    /// succeed when retried by the caller.
    ///
    /// `Conflict` is deliberately not transient: callers resolve it with a
    /// fresh read-modify-write cycle, not a blind retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::CasRetriesExhausted { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_display_includes_key() {
        let err = StorageError::not_found("config");
        assert_eq!(err.to_string(), "Key not found: config");

        let err = StorageError::conflict("leases/abc");
        assert!(err.to_string().contains("leases/abc"));
    }

    #[test]
    fn test_source_chain_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StorageError::connection_with_source("dial failed", io);
        let source = err.source().expect("source should be present");
        assert_eq!(source.to_string(), "refused");
    }

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::connection("down").is_transient());
        assert!(StorageError::cas_retries_exhausted(5).is_transient());
        assert!(!StorageError::conflict("k").is_transient());
        assert!(!StorageError::not_found("k").is_transient());
        assert!(!StorageError::serialization("bad").is_transient());
    }
}
