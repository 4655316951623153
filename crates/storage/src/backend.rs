//! Storage backend trait definition.
//!
//! [`StorageBackend`] is the persistence boundary of the token engine. The
//! engine stores two kinds of records through it: the plugin configuration
//! and one lease record per issued credential.
//!
//! # Design Philosophy
//!
//! - **Keys and values are bytes**: the backend makes no assumptions about encoding
//! - **Async by default**: a production backend talks to a remote store
//! - **Compare-and-set**: read-modify-write cycles are made atomic with a byte-level CAS rather than
//!   a lock held across awaits
//!
//! # JSON Records
//!
//! The `*_json` helpers encode records as field-name-keyed JSON objects.
//! Record types are expected to be declared without `deny_unknown_fields`
//! and with `#[serde(default)]`, so that decoding an older or newer record
//! ignores unknown fields and zero-fills missing ones.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::{StorageError, StorageResult},
    types::KeyValue,
};

/// Abstract storage backend for key-value operations.
///
/// Backends must be thread-safe (`Send + Sync`) and support concurrent
/// operations.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Retrieve a single value by key |
/// | [`set`](StorageBackend::set) | Store a key-value pair |
/// | [`compare_and_set`](StorageBackend::compare_and_set) | Atomic compare-and-swap |
/// | [`delete`](StorageBackend::delete) | Remove a key |
/// | [`list_prefix`](StorageBackend::list_prefix) | Retrieve every entry under a prefix |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use argocd_tokens_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"config".to_vec(), b"{}".to_vec()).await.unwrap();
/// let value = backend.get(b"config").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("{}")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair, overwriting any existing value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Atomically sets a key's value if it matches the expected current value.
    ///
    /// # Semantics
    ///
    /// - **`expected: None`**: insert-if-absent. Fails with
    ///   [`Conflict`](crate::StorageError::Conflict) if any value is present.
    /// - **`expected: Some(value)`**: update-if-unchanged. Fails with
    ///   [`Conflict`](crate::StorageError::Conflict) if the key is absent or holds different bytes.
    ///
    /// The comparison is an exact byte equality check.
    ///
    /// # Retry Pattern
    ///
    /// `Conflict` is not transient. Callers re-read the key and recompute the
    /// new value before trying again.
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Deletes a key.
    ///
    /// If the key doesn't exist, this is a no-op.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Retrieves every entry whose key starts with `prefix`, in key order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>>;

    /// Retrieves and decodes a JSON record.
    ///
    /// Returns the raw bytes alongside the decoded value so that callers can
    /// use them as the `expected` side of a later
    /// [`compare_and_set`](StorageBackend::compare_and_set).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the stored bytes are not a
    /// JSON document compatible with `T`.
    async fn get_json<T>(&self, key: &[u8]) -> StorageResult<Option<(T, Bytes)>>
    where
        T: DeserializeOwned + Send,
    {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };
        let value = decode_json(key, &raw)?;
        Ok(Some((value, raw)))
    }

    /// Encodes a record as JSON and stores it.
    async fn set_json<T>(&self, key: Vec<u8>, value: &T) -> StorageResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = encode_json(value)?;
        self.set(key, bytes).await
    }

    /// Encodes a record as JSON and stores it if the current bytes equal
    /// `expected`.
    ///
    /// `expected` is the raw byte form returned by
    /// [`get_json`](StorageBackend::get_json), so no re-serialization of the
    /// previous value is needed for the comparison to be exact.
    async fn compare_and_set_json<T>(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: &T,
    ) -> StorageResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = encode_json(new_value)?;
        self.compare_and_set(key, expected, bytes).await
    }
}

/// Encodes a value into JSON bytes.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::serialization_with_source("failed to encode record", e))
}

/// Decodes JSON bytes stored under `key`.
pub fn decode_json<T: DeserializeOwned>(key: &[u8], raw: &[u8]) -> StorageResult<T> {
    serde_json::from_slice(raw).map_err(|e| {
        StorageError::serialization_with_source(
            format!("failed to decode record {}", String::from_utf8_lossy(key)),
            e,
        )
    })
}
