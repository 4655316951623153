//! Persistence boundary for the Argo CD token lifecycle engine.
//!
//! This crate provides the [`StorageBackend`] trait the engine persists its
//! configuration and lease records through, plus an in-memory implementation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     argocd-tokens                           │
//! │        ConfigStore │ LeaseRegistry │ TokenBackend           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 argocd-tokens-storage                       │
//! │                  StorageBackend trait                       │
//! │   (get, set, compare_and_set, delete, list_prefix, *_json)  │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryBackend│       host-provided persistent backend       │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use argocd_tokens_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     backend.compare_and_set(b"config", None, b"{}".to_vec()).await?;
//!     let value = backend.get(b"config").await?;
//!     assert_eq!(value.map(|b| b.to_vec()), Some(b"{}".to_vec()));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a fault-injecting backend wrapper.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod types;

pub use backend::{StorageBackend, decode_json, encode_json};
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use types::KeyValue;
