//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] keeps every record in a [`BTreeMap`] behind a
//! [`parking_lot::RwLock`]. It backs tests and single-process deployments
//! where losing leases on restart is acceptable.
//!
//! # Example
//!
//! ```
//! use argocd_tokens_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"leases/abc".to_vec(), b"{}".to_vec()).await.unwrap();
//!     let leases = backend.list_prefix(b"leases/").await.unwrap();
//!
//!     assert_eq!(leases.len(), 1);
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Locks are never held across an await point, so every operation completes synchronously

use std::{collections::BTreeMap, ops::Bound, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    types::KeyValue,
};

/// In-memory storage backend using [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
}

impl MemoryBackend {
    /// Creates a new, empty in-memory storage backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.data.write().insert(key, Bytes::from(value));
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        let mut data = self.data.write();

        let matches = match (expected, data.get(key)) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == &cur[..],
            _ => false,
        };

        if !matches {
            tracing::trace!(key = %String::from_utf8_lossy(key), "compare-and-set conflict");
            return Err(StorageError::conflict(String::from_utf8_lossy(key)));
        }

        data.insert(key.to_vec(), Bytes::from(new_value));
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        if self.data.write().remove(key).is_none() {
            tracing::trace!(key = %String::from_utf8_lossy(key), "delete of absent key");
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        let data = self.data.read();
        let results = data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
            .collect();
        Ok(results)
    }
}
