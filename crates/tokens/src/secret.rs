//! Lease-bound secrets.
//!
//! An issued credential is split in two: the caller-visible
//! [`TokenResponse`], which carries the raw token exactly once, and the
//! [`RevocationRecord`], which carries only what a later destroy needs.
//! The host stores the record as the secret's internal state and hands it
//! back to [`revoke`] on expiry or explicit revocation.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::{
    config::PluginConfig,
    error::{Result, TokenError},
    issuance::{IssuanceId, IssuedCredential},
    port::{CredentialConnector, PortError, release},
    principal::{Principal, PrincipalKind},
};

/// The secret types this engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    /// A token for an account.
    AccountTokenSecret,
    /// A token for a project role.
    ProjectTokenSecret,
}

impl SecretType {
    /// Returns the secret type that wraps credentials of `kind`.
    #[must_use]
    pub fn for_kind(kind: PrincipalKind) -> Self {
        match kind {
            PrincipalKind::Account => Self::AccountTokenSecret,
            PrincipalKind::ProjectRole => Self::ProjectTokenSecret,
        }
    }

    /// Returns the principal kind this secret type wraps.
    #[must_use]
    pub fn kind(self) -> PrincipalKind {
        match self {
            Self::AccountTokenSecret => PrincipalKind::Account,
            Self::ProjectTokenSecret => PrincipalKind::ProjectRole,
        }
    }

    /// Returns the wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccountTokenSecret => "account_token_secret",
            Self::ProjectTokenSecret => "project_token_secret",
        }
    }

    /// Checks that `record` was filed under this secret type.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidRecord`] on a kind mismatch.
    pub fn check(self, record: &RevocationRecord) -> Result<()> {
        if record.principal.kind() == self.kind() {
            return Ok(());
        }
        Err(TokenError::InvalidRecord {
            id: record.id.clone(),
            message: format!("{} record filed as {}", record.principal.kind(), self.as_str()),
        })
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-visible issuance payload.
///
/// ```json
/// {"id": "…", "principal_kind": "account", "account_name": "ci-bot", "token": "…"}
/// ```
#[derive(Clone, Serialize)]
pub struct TokenResponse {
    /// Credential id.
    pub id: IssuanceId,
    /// Who the token is for.
    #[serde(flatten)]
    pub principal: Principal,
    /// The raw token.
    pub token: Zeroizing<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// The minimal state needed to destroy a credential later.
///
/// Deliberately has no token and no lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Credential id.
    pub id: IssuanceId,
    /// Who the credential belongs to.
    #[serde(flatten)]
    pub principal: Principal,
}

/// A credential bound to a lease.
#[derive(Debug, Clone)]
pub struct SecretResponse {
    /// Secret type the host files the lease under.
    pub secret_type: SecretType,
    /// Returned to the caller once.
    pub data: TokenResponse,
    /// Persisted by the host as the lease's internal state.
    pub internal: RevocationRecord,
    /// Lease duration, equal to the token's lifetime.
    pub lease: Duration,
}

/// Splits an issued credential into response payload and revocation record.
#[must_use]
pub fn wrap(issued: IssuedCredential) -> SecretResponse {
    let IssuedCredential { id, principal, lifetime, token } = issued;
    SecretResponse {
        secret_type: SecretType::for_kind(principal.kind()),
        internal: RevocationRecord { id: id.clone(), principal: principal.clone() },
        data: TokenResponse { id, principal, token },
        lease: lifetime,
    }
}

/// Destroys the credential named by `record`.
///
/// Opens a session of the record's kind, destroys the token and releases
/// the session. A token the remote side no longer knows counts as revoked.
/// Nothing is retried here; a failure is returned so the host's lease
/// scheduler can try again.
///
/// # Errors
///
/// - [`TokenError::Connect`] if no session could be opened
/// - [`TokenError::DestroyFailed`] for any other remote failure
/// - [`TokenError::Cancelled`] if `cancel` fired
#[tracing::instrument(
    skip(connector, config, record, cancel),
    fields(id = %record.id, principal = %record.principal)
)]
pub async fn revoke(
    connector: &dyn CredentialConnector,
    config: &PluginConfig,
    record: &RevocationRecord,
    cancel: CancellationToken,
) -> Result<()> {
    let kind = record.principal.kind();
    let port = connector
        .connect(config, kind, cancel)
        .await
        .map_err(|source| TokenError::Connect {
            principal: record.principal.clone(),
            id: Some(record.id.clone()),
            source,
        })?;

    let outcome = port.destroy(&record.principal, &record.id).await;
    release(port).await;

    match outcome {
        Ok(()) => {
            tracing::info!("token deleted");
            Ok(())
        },
        Err(PortError::NotFound { .. }) => {
            tracing::info!("token already absent on argo cd, treating as revoked");
            Ok(())
        },
        Err(PortError::Cancelled) => Err(TokenError::Cancelled {
            principal: record.principal.clone(),
            id: record.id.clone(),
        }),
        Err(source) => {
            tracing::warn!(error = %source, "token deletion failed");
            Err(TokenError::DestroyFailed {
                id: record.id.clone(),
                principal: record.principal.clone(),
                source,
            })
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testutil::{MockCredentialConnector, test_config};

    fn issued(principal: Principal) -> IssuedCredential {
        IssuedCredential {
            id: IssuanceId::from("7f1c"),
            principal,
            lifetime: Duration::from_secs(600),
            token: Zeroizing::new("raw-token-value".into()),
        }
    }

    #[test]
    fn test_wrap_splits_token_from_record() {
        let secret = wrap(issued(Principal::account("ci-bot")));
        assert_eq!(secret.secret_type, SecretType::AccountTokenSecret);
        assert_eq!(secret.lease, Duration::from_secs(600));
        assert_eq!(secret.internal.id, secret.data.id);

        let data = serde_json::to_value(&secret.data).unwrap();
        assert_eq!(
            data,
            serde_json::json!({
                "id": "7f1c",
                "principal_kind": "account",
                "account_name": "ci-bot",
                "token": "raw-token-value",
            })
        );

        let internal = serde_json::to_string(&secret.internal).unwrap();
        assert!(!internal.contains("raw-token-value"));
        assert!(!internal.contains("token\""));
        assert!(!format!("{secret:?}").contains("raw-token-value"));
    }

    #[test]
    fn test_project_record_round_trip() {
        let secret = wrap(issued(Principal::project_role("web", "ci")));
        assert_eq!(secret.secret_type, SecretType::ProjectTokenSecret);

        let json = serde_json::to_value(&secret.internal).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "7f1c",
                "principal_kind": "project_role",
                "project_name": "web",
                "project_role_name": "ci",
            })
        );
        let back: RevocationRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, secret.internal);
    }

    #[test]
    fn test_secret_type_check() {
        let record = RevocationRecord { id: "x".into(), principal: Principal::account("a") };
        SecretType::AccountTokenSecret.check(&record).unwrap();
        let err = SecretType::ProjectTokenSecret.check(&record).unwrap_err();
        assert!(err.to_string().contains("account record filed as project_token_secret"));
    }

    #[tokio::test]
    async fn test_revoke_unknown_id_succeeds() {
        let connector = MockCredentialConnector::new();
        let record = RevocationRecord { id: "never-minted".into(), principal: Principal::account("a") };

        revoke(&connector, &test_config(), &record, CancellationToken::new()).await.unwrap();
        assert_eq!(connector.destroy_calls().len(), 1);
        assert_eq!(connector.sessions_open(), 0);
    }

    #[tokio::test]
    async fn test_revoke_remote_error_is_surfaced_not_retried() {
        let connector = MockCredentialConnector::new();
        connector.fail_destroys_with(PortError::remote(500, "token with id 'x' does not exist"));
        let record = RevocationRecord { id: "x".into(), principal: Principal::project_role("web", "ci") };

        let err = revoke(&connector, &test_config(), &record, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::DestroyFailed { .. }));
        assert!(err.to_string().contains("does not exist"));
        assert!(err.is_retryable());
        assert_eq!(connector.destroy_calls().len(), 1);
        assert_eq!(connector.sessions_open(), 0);
    }

    #[tokio::test]
    async fn test_revoke_close_failure_is_not_escalated() {
        let connector = MockCredentialConnector::new();
        connector.fail_close(true);
        let record = RevocationRecord { id: "x".into(), principal: Principal::account("a") };

        revoke(&connector, &test_config(), &record, CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_revoke_connect_failure() {
        let connector = MockCredentialConnector::new();
        connector.fail_connect(true);
        let record = RevocationRecord { id: "x".into(), principal: Principal::account("a") };

        let err = revoke(&connector, &test_config(), &record, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Connect { id: Some(ref id), .. } if id.as_str() == "x"));
        assert!(err.to_string().contains("for account(a) token(x):"), "{err}");
        assert!(connector.destroy_calls().is_empty());
    }
}
