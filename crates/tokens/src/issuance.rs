//! Token issuance: identifier generation, lifetime resolution and the
//! retrying mint protocol.

use std::{fmt, time::Duration};

use fail::fail_point;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    error::{Result, TokenError},
    port::{CredentialPort, PortError},
    principal::Principal,
    retry::{RetryPolicy, with_mint_retry},
};

/// Lifetime applied when the caller does not ask for one.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Client-generated credential id.
///
/// One id is generated per logical issuance and reused on every retry, so a
/// remote side that deduplicates by id can recognise a repeated request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssuanceId(String);

impl IssuanceId {
    /// Generates a fresh random (v4 UUID) id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for IssuanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for IssuanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for IssuanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed request for a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    /// Who the token is for.
    pub principal: Principal,
    /// Requested lifetime, if the caller gave one.
    pub requested_lifetime: Option<Duration>,
}

impl TokenRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(principal: Principal, requested_lifetime: Option<Duration>) -> Self {
        Self { principal, requested_lifetime }
    }
}

/// A token minted on the remote side.
///
/// The token value is only ever held here and in the response built from
/// it. `Debug` redacts it.
pub struct IssuedCredential {
    /// Credential id, identical to the one sent on every mint attempt.
    pub id: IssuanceId,
    /// Who the token is for.
    pub principal: Principal,
    /// Effective lifetime after capping.
    pub lifetime: Duration,
    /// The raw token.
    pub token: Zeroizing<String>,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("lifetime", &self.lifetime)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Shortest lifetime a token is minted with.
pub const MIN_TOKEN_TTL: Duration = Duration::from_secs(1);

/// Resolves the lifetime a token is minted with.
///
/// `min(requested or default, max)` in whole seconds, never below
/// [`MIN_TOKEN_TTL`]. The remote side takes its expiry in whole seconds and
/// reads zero as "never expires", so a request under one second counts as
/// omitted. `max` is expected to be at least [`MIN_TOKEN_TTL`].
#[must_use]
pub fn resolve_lifetime(requested: Option<Duration>, default: Duration, max: Duration) -> Duration {
    let whole = |d: Duration| Duration::from_secs(d.as_secs());
    let requested = requested.map(whole).filter(|d| !d.is_zero()).unwrap_or(default);
    whole(requested.min(max)).max(MIN_TOKEN_TTL)
}

/// Runs the mint protocol against one session.
#[derive(Debug, Clone)]
pub struct IssuanceEngine {
    policy: RetryPolicy,
    default_lifetime: Duration,
}

impl IssuanceEngine {
    /// Creates an engine with an explicit retry schedule and default lifetime.
    #[must_use]
    pub fn new(policy: RetryPolicy, default_lifetime: Duration) -> Self {
        Self { policy, default_lifetime }
    }

    /// Returns the retry schedule.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Mints a token for `request`, retrying on the engine's schedule.
    ///
    /// The lifetime is capped at `max_lifetime` no matter what was requested.
    /// One id is generated up front and reused on every attempt.
    ///
    /// # Errors
    ///
    /// - [`TokenError::MintFailed`] with the last attempt's error once the schedule is exhausted
    /// - [`TokenError::Cancelled`] if `cancel` fires
    #[tracing::instrument(
        skip(self, port, request, cancel),
        fields(
            principal = %request.principal,
            id = tracing::field::Empty,
            lifetime_secs = tracing::field::Empty
        )
    )]
    pub async fn issue(
        &self,
        port: &dyn CredentialPort,
        request: &TokenRequest,
        max_lifetime: Duration,
        cancel: &CancellationToken,
    ) -> Result<IssuedCredential> {
        let id = IssuanceId::generate();
        let lifetime =
            resolve_lifetime(request.requested_lifetime, self.default_lifetime, max_lifetime);
        let span = tracing::Span::current();
        span.record("id", id.as_str());
        span.record("lifetime_secs", lifetime.as_secs());

        let principal = &request.principal;
        let id_ref = &id;
        let outcome = with_mint_retry(&self.policy, cancel, "mint", move |attempt| {
            attempt_mint(port, principal, lifetime, id_ref, attempt)
        })
        .await;

        match outcome {
            Ok(token) => {
                tracing::debug!("token minted");
                Ok(IssuedCredential { id, principal: principal.clone(), lifetime, token })
            },
            Err(failure) if matches!(failure.last_error, PortError::Cancelled) => {
                Err(TokenError::Cancelled { principal: principal.clone(), id })
            },
            Err(failure) => {
                tracing::error!(
                    attempts = failure.attempts,
                    error = %failure.last_error,
                    "giving up on mint",
                );
                Err(TokenError::MintFailed {
                    principal: principal.clone(),
                    id,
                    attempts: failure.attempts,
                    source: failure.last_error,
                })
            },
        }
    }
}

impl Default for IssuanceEngine {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), DEFAULT_TOKEN_TTL)
    }
}

async fn attempt_mint(
    port: &dyn CredentialPort,
    principal: &Principal,
    lifetime: Duration,
    id: &IssuanceId,
    attempt: u32,
) -> std::result::Result<Zeroizing<String>, PortError> {
    fail_point!("mint-attempt", |msg: Option<String>| {
        Err(PortError::transport(msg.unwrap_or_else(|| "injected mint failure".into())))
    });
    tracing::debug!(attempt, "minting token");
    port.mint(principal, lifetime, id).await
}
