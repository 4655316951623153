//! The boundary to the remote credential service.
//!
//! A [`CredentialConnector`] opens one [`CredentialPort`] session per
//! principal kind and logical operation. Sessions are owned by exactly one
//! request and must be released with [`CredentialPort::close`] once the
//! outcome is known, whether it succeeded or not.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::{
    config::PluginConfig,
    issuance::IssuanceId,
    principal::{Principal, PrincipalKind},
};

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors returned by a credential session.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PortError {
    /// The request never produced a response.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// Underlying transport error.
        #[source]
        source: Option<BoxError>,
    },

    /// The remote service answered with an error.
    #[error("argo cd rejected request ({status}): {message}")]
    Remote {
        /// Status code reported by the remote service.
        status: u16,
        /// Message reported by the remote service.
        message: String,
    },

    /// The remote service does not know the token.
    #[error("token({id}) does not exist")]
    NotFound {
        /// The unknown credential id.
        id: String,
    },

    /// The remote answered with something that is not a token response.
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// What was wrong with the payload.
        message: String,
    },

    /// The session serves a different principal kind.
    #[error("session for {expected} tokens cannot serve a {actual} principal")]
    KindMismatch {
        /// Kind the session was opened for.
        expected: PrincipalKind,
        /// Kind of the principal passed in.
        actual: PrincipalKind,
    },

    /// The caller-scoped cancellation token fired.
    #[error("request cancelled")]
    Cancelled,
}

impl PortError {
    /// Creates a `Transport` error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into(), source: None }
    }

    /// Creates a `Transport` error with a source.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Remote` error.
    #[must_use]
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote { status, message: message.into() }
    }

    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an `InvalidResponse` error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse { message: message.into() }
    }

    /// Returns `true` if a mint attempt that failed this way may be retried.
    ///
    /// Everything the remote side or the network can produce is retryable.
    /// Cancellation and kind mismatches are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::KindMismatch { .. })
    }

    /// Checks that `principal` can be served by a session of `expected` kind.
    pub fn check_kind(expected: PrincipalKind, principal: &Principal) -> Result<(), Self> {
        let actual = principal.kind();
        if actual == expected {
            Ok(())
        } else {
            Err(Self::KindMismatch { expected, actual })
        }
    }
}

/// One session against the remote credential API.
#[async_trait]
pub trait CredentialPort: Send + Sync {
    /// Principal kind this session serves.
    fn kind(&self) -> PrincipalKind;

    /// Creates a token for `principal` that expires after `lifetime`.
    ///
    /// The same `id` is passed on every retry of one logical request so a
    /// remote side that deduplicates by id can do so. Nothing here assumes
    /// it does.
    async fn mint(
        &self,
        principal: &Principal,
        lifetime: Duration,
        id: &IssuanceId,
    ) -> Result<Zeroizing<String>, PortError>;

    /// Deletes the token `id` of `principal`.
    ///
    /// Returns [`PortError::NotFound`] when the remote side reports the token
    /// as absent. Callers decide whether that is fatal.
    async fn destroy(&self, principal: &Principal, id: &IssuanceId) -> Result<(), PortError>;

    /// Releases the session's transport.
    async fn close(self: Box<Self>) -> Result<(), PortError>;
}

/// Opens [`CredentialPort`] sessions from the stored configuration.
#[async_trait]
pub trait CredentialConnector: Send + Sync {
    /// Opens a session for `kind` principals.
    ///
    /// `cancel` is scoped to the caller's request. Firing it aborts any call
    /// in flight on the returned session.
    async fn connect(
        &self,
        config: &PluginConfig,
        kind: PrincipalKind,
        cancel: CancellationToken,
    ) -> Result<Box<dyn CredentialPort>, PortError>;
}

/// Closes a session, logging instead of returning a failure.
///
/// The logical result is already decided when this runs.
pub(crate) async fn release(port: Box<dyn CredentialPort>) {
    let kind = port.kind();
    if let Err(err) = port.close().await {
        tracing::warn!(kind = %kind, error = %err, "failed to close argo cd session");
    }
}
