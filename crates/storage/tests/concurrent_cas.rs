//! Concurrent compare-and-set tests for `MemoryBackend`.
//!
//! These exercise the CAS primitive that configuration writes rely on to
//! avoid lost updates when two writers race.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::collections::HashSet;

use argocd_tokens_storage::{MemoryBackend, StorageBackend, StorageError};
use tokio::task::JoinSet;

const CONCURRENCY: usize = 16;
const CAS_ROUNDS: usize = 25;

// ---------------------------------------------------------------------------
// Test: exactly one winner per insert-if-absent round
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_insert_if_absent_has_one_winner() {
    let backend = MemoryBackend::new();

    for round in 0..CAS_ROUNDS {
        let key = format!("round:{round:03}").into_bytes();
        let mut set = JoinSet::new();
        for task_id in 0..CONCURRENCY {
            let backend = backend.clone();
            let key = key.clone();
            set.spawn(async move {
                match backend.compare_and_set(&key, None, task_id.to_string().into_bytes()).await {
                    Ok(()) => Some(task_id),
                    Err(StorageError::Conflict { .. }) => None,
                    Err(other) => panic!("unexpected error: {other}"),
                }
            });
        }

        let mut winners = HashSet::new();
        while let Some(result) = set.join_next().await {
            if let Some(id) = result.expect("task should not panic") {
                winners.insert(id);
            }
        }
        assert_eq!(winners.len(), 1, "round {round} should have exactly one winner");
    }
}

// ---------------------------------------------------------------------------
// Test: read-modify-write counter loses no increments
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cas_counter_loses_no_updates() {
    let backend = MemoryBackend::new();
    let key = b"counter".to_vec();

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let backend = backend.clone();
        let key = key.clone();
        set.spawn(async move {
            loop {
                let current = backend.get(&key).await.expect("get");
                let n: u64 = current
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).parse().expect("counter"))
                    .unwrap_or(0);
                match backend
                    .compare_and_set(&key, current.as_deref(), (n + 1).to_string().into_bytes())
                    .await
                {
                    Ok(()) => break,
                    Err(StorageError::Conflict { .. }) => tokio::task::yield_now().await,
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    let value = backend.get(&key).await.unwrap().expect("counter should exist");
    assert_eq!(String::from_utf8_lossy(&value), CONCURRENCY.to_string());
}
