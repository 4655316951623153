//! Argo CD REST gateway client for the `argocd-tokens` lifecycle engine.
//!
//! [`ArgoCdConnector`] implements
//! [`CredentialConnector`](argocd_tokens::CredentialConnector): for each
//! request it opens an [`ArgoCdSession`] against the configured Argo CD
//! instance, authenticated with the stored admin token.
//!
//! # Endpoints
//!
//! | Operation       | Request                                                      |
//! | --------------- | ------------------------------------------------------------ |
//! | account mint    | `POST /api/v1/account/{name}/token`                          |
//! | account destroy | `DELETE /api/v1/account/{name}/token/{id}`                   |
//! | project mint    | `POST /api/v1/projects/{project}/roles/{role}/token`         |
//! | project destroy | `DELETE /api/v1/projects/{project}/roles/{role}/token/0?id=` |
//!
//! # Transport
//!
//! The scheme is `https` unless the configuration sets `plaintext`.
//! `insecure` disables certificate verification. Both are meant for test
//! installations only.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use argocd_tokens::{BackendSettings, TokenBackend};
//! use argocd_tokens_http::ArgoCdConnector;
//! use argocd_tokens_storage::MemoryBackend;
//!
//! let connector = ArgoCdConnector::builder().request_timeout(Duration::from_secs(10)).build();
//! let backend =
//!     TokenBackend::new(MemoryBackend::new(), Arc::new(connector), BackendSettings::default());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connector;
mod session;
mod wire;

pub use connector::{
    ArgoCdConnector, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, base_url,
};
pub use session::ArgoCdSession;
