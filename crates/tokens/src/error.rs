//! Error types for the token lifecycle engine.
//!
//! Every message that concerns a credential names the principal and, once
//! one exists, the credential id. Messages never contain the admin token or
//! a minted token value.

use argocd_tokens_storage::StorageError;
use thiserror::Error;

use crate::{
    fields::FieldError,
    issuance::IssuanceId,
    port::PortError,
    principal::Principal,
};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, TokenError>;

/// Configuration validation errors.
///
/// Raised both for persisted plugin configuration and for process-level
/// [`BackendSettings`](crate::BackendSettings). A configuration write that
/// fails validation commits nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required field was absent and no previous value is stored.
    #[error("{field} is required when no configuration is stored yet")]
    MissingRequired {
        /// Field name.
        field: &'static str,
    },

    /// The remote endpoint is not a bare host address.
    #[error(
        "invalid argo cd url: argo cd url({endpoint}) should only contain the address without protocol: {reason}"
    )]
    InvalidEndpoint {
        /// The rejected endpoint.
        endpoint: String,
        /// Which rule it broke.
        reason: &'static str,
    },

    /// A numeric setting is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Setting name.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// Rejected value.
        value: String,
    },

    /// A duration setting must be at least one second.
    #[error("{field} must be at least 1s, got {value}")]
    MustBePositive {
        /// Setting name.
        field: &'static str,
        /// Rejected value.
        value: String,
    },
}

/// Errors surfaced by [`TokenBackend`](crate::TokenBackend) operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// The configuration update was rejected.
    #[error("error while validating config: {0}")]
    Config(#[from] ConfigError),

    /// An inbound field was missing or mistyped.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// No configuration has been written for this mount.
    #[error("error while reading config from storage: backend is not configured")]
    NotConfigured,

    /// A storage operation failed.
    #[error("{context}: {source}")]
    Storage {
        /// What the engine was doing.
        context: String,
        /// The storage failure.
        #[source]
        source: StorageError,
    },

    /// A remote session could not be opened.
    #[error("error while connecting to argo cd for {principal}{}: {source}", token_suffix(.id))]
    Connect {
        /// Principal the session was opened for.
        principal: Principal,
        /// Credential id, when the session was for an existing token.
        id: Option<IssuanceId>,
        /// Transport failure.
        #[source]
        source: PortError,
    },

    /// Every mint attempt failed. The source is the final attempt's error.
    #[error(
        "error while creating token({id}) for {principal} after {attempts} attempt(s): {source}"
    )]
    MintFailed {
        /// Principal the token was requested for.
        principal: Principal,
        /// Identifier used on every attempt.
        id: IssuanceId,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last attempt's error.
        #[source]
        source: PortError,
    },

    /// Destroying a remote token failed. The host's lease scheduler retries.
    #[error("error while deleting token({id}) for {principal}: {source}")]
    DestroyFailed {
        /// Credential id.
        id: IssuanceId,
        /// Principal the credential belongs to.
        principal: Principal,
        /// Remote failure.
        #[source]
        source: PortError,
    },

    /// A token was minted but its lease could not be recorded.
    ///
    /// `compensated` tells whether the token was destroyed again. When it is
    /// `false` the remote credential is orphaned and must be removed by hand.
    #[error(
        "error while recording lease for token({id}) for {principal} (compensating delete succeeded: {compensated}): {source}"
    )]
    LeaseNotRecorded {
        /// Credential id.
        id: IssuanceId,
        /// Principal the credential belongs to.
        principal: Principal,
        /// Whether the minted token was destroyed after the failure.
        compensated: bool,
        /// Storage failure.
        #[source]
        source: StorageError,
    },

    /// No lease is stored under the given id.
    #[error("lease {lease_id} not found")]
    LeaseNotFound {
        /// Lease id.
        lease_id: String,
    },

    /// The revocation record does not match the secret type it was filed under.
    #[error("invalid revocation record for token({id}): {message}")]
    InvalidRecord {
        /// Credential id from the record.
        id: IssuanceId,
        /// What was wrong.
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("operation on token({id}) for {principal} cancelled")]
    Cancelled {
        /// Principal the operation was for.
        principal: Principal,
        /// Credential id.
        id: IssuanceId,
    },
}

fn token_suffix(id: &Option<IssuanceId>) -> String {
    id.as_ref().map(|id| format!(" token({id})")).unwrap_or_default()
}

impl TokenError {
    /// Wraps a storage failure with a description of the operation.
    #[must_use]
    pub fn storage(context: impl Into<String>, source: StorageError) -> Self {
        Self::Storage { context: context.into(), source }
    }

    /// Returns `true` when the host should retry the same request later.
    ///
    /// Revocation failures are always retryable. Destroy is never retried
    /// locally; the host's lease scheduler decides when to try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage { source, .. } => source.is_transient(),
            Self::Connect { .. } | Self::DestroyFailed { .. } | Self::LeaseNotRecorded { .. } => {
                true
            },
            _ => false,
        }
    }
}
