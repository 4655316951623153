//! Shared test utilities for code built on [`StorageBackend`].
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! argocd-tokens-storage = { path = "../storage", features = ["testutil"] }
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    StorageBackend,
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
    types::KeyValue,
};

/// A [`MemoryBackend`] wrapper whose writes can be made to fail on demand.
///
/// Reads always succeed. Clones share both the data and the fault switches.
#[derive(Clone, Default)]
pub struct FaultyBackend {
    inner: MemoryBackend,
    fail_writes: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
    forced_conflicts: Arc<AtomicU32>,
}

impl FaultyBackend {
    /// Creates a backend with all faults disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the wrapped backend, which observes the same data.
    #[must_use]
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    /// Makes every `set` and `compare_and_set` fail with a connection error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every `delete` fail with a connection error.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to `compare_and_set` report a conflict
    /// without touching the data.
    pub fn force_conflicts(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    fn check_writes(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::connection("injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FaultyBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.check_writes()?;
        self.inner.set(key, value).await
    }

    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.check_writes()?;
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Err(StorageError::conflict(String::from_utf8_lossy(key)));
        }
        self.inner.compare_and_set(key, expected, new_value).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::connection("injected delete failure"));
        }
        self.inner.delete(key).await
    }

    async fn list_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        self.inner.list_prefix(prefix).await
    }
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
///
/// # Panics
///
/// Panics if the result is `Ok` or a different error.
#[track_caller]
pub fn assert_conflict<T: std::fmt::Debug>(result: StorageResult<T>) {
    match result {
        Err(StorageError::Conflict { .. }) => {},
        other => panic!("expected Conflict, got {other:?}"),
    }
}
