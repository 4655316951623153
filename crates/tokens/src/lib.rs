//! Lifecycle engine for short-lived Argo CD account and project tokens.
//!
//! Operators configure an Argo CD endpoint and admin token once. Consumers
//! then request tokens for an account or a project role and get back a
//! credential bound to a lease. On lease expiry or explicit revocation the
//! engine deletes the token on the Argo CD side again.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TokenBackend                           │
//! │   read/write config │ issue │ revoke │ revoke_expired       │
//! ├──────────────┬──────────────────┬───────────────────────────┤
//! │ ConfigStore  │ IssuanceEngine   │ LeaseRegistry             │
//! │ (CAS merge)  │ (retrying mint)  │ (leases/<id>)             │
//! ├──────────────┴────────┬─────────┴───────────────────────────┤
//! │  StorageBackend       │  CredentialConnector / Port         │
//! │  (argocd-tokens-      │  (argocd-tokens-http, or a mock)    │
//! │   storage)            │                                     │
//! └───────────────────────┴─────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use argocd_tokens::{
//!     BackendSettings, ConfigUpdate, TokenBackend, TokenRequest, principal::Principal,
//!     testutil::MockCredentialConnector,
//! };
//! use argocd_tokens_storage::MemoryBackend;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = TokenBackend::new(
//!     MemoryBackend::new(),
//!     Arc::new(MockCredentialConnector::new()),
//!     BackendSettings::default(),
//! );
//!
//! backend
//!     .write_config(
//!         &ConfigUpdate::builder()
//!             .argo_cd_url("argocd.example.com")
//!             .admin_token("admin-token")
//!             .build(),
//!     )
//!     .await?;
//!
//! let request = TokenRequest::new(Principal::account("ci-bot"), None);
//! let secret = backend.issue(&request, CancellationToken::new()).await?;
//! assert_eq!(secret.secret_type.as_str(), "account_token_secret");
//! # Ok(())
//! # }
//! ```
//!
//! # Retries
//!
//! Minting is retried on the [`RetryPolicy`] schedule (by default 4 attempts
//! waiting 0s, 3s, 5s and 10s). Every attempt of one request carries the
//! same credential id. Revocation is never retried here; a failed destroy is
//! returned so the lease scheduler can try again later.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a mock credential connector.
//! - **`failpoints`**: Activates the `fail` crate's injection points
//!   (`mint-attempt`, `config-before-commit`, `cas-retry-before-sleep`).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod fields;
pub mod help;
pub mod issuance;
pub mod lease;
pub mod port;
pub mod principal;
pub mod retry;
pub mod secret;
pub mod settings;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

pub use backend::{RevocationSweep, TokenBackend};
pub use config::{ConfigStore, ConfigUpdate, ConfigView, PluginConfig, TtlLimits};
pub use error::{ConfigError, Result, TokenError};
pub use fields::{FieldData, FieldError};
pub use issuance::{IssuanceEngine, IssuanceId, IssuedCredential, TokenRequest};
pub use lease::{Lease, LeaseRegistry};
pub use port::{CredentialConnector, CredentialPort, PortError};
pub use principal::{Principal, PrincipalKind};
pub use retry::{CasRetryConfig, RetryPolicy};
pub use secret::{RevocationRecord, SecretResponse, SecretType, TokenResponse};
pub use settings::BackendSettings;
