//! The token backend facade.
//!
//! [`TokenBackend`] is what a front-end drives. It wires the configuration
//! store, the issuance engine, the lease registry and a
//! [`CredentialConnector`] together:
//!
//! ```text
//! fields ─► TokenRequest ─► ConfigStore::read ─► connect(kind)
//!        ─► IssuanceEngine::issue (retrying mint) ─► wrap ─► LeaseRegistry::record ─► response
//!
//! lease expiry / revoke ─► LeaseRegistry::get ─► revoke (destroy) ─► LeaseRegistry::remove
//! ```
//!
//! Every call is an independent unit of work. The backend is cheap to clone
//! and safe to share between concurrent requests; the only shared mutable
//! state is the configuration record, which is updated with compare-and-set.

use std::sync::Arc;

use argocd_tokens_storage::StorageBackend;
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ConfigStore, ConfigUpdate, ConfigView, PluginConfig},
    error::{Result, TokenError},
    fields::FieldData,
    help::{BACKEND_HELP, HelpPath, PathHelp, path_help},
    issuance::{IssuanceEngine, TokenRequest},
    lease::{Lease, LeaseRegistry},
    port::{CredentialConnector, PortError, release},
    secret::{RevocationRecord, SecretResponse, SecretType, revoke, wrap},
    settings::BackendSettings,
};

/// Outcome of [`TokenBackend::revoke_expired`].
#[derive(Debug, Default)]
pub struct RevocationSweep {
    /// Leases revoked and removed.
    pub revoked: Vec<String>,
    /// Leases left in place because revocation failed.
    pub failed: Vec<(String, TokenError)>,
}

struct Inner<S> {
    config: ConfigStore<S>,
    leases: LeaseRegistry<S>,
    connector: Arc<dyn CredentialConnector>,
    engine: IssuanceEngine,
}

/// Issues and revokes lease-bound Argo CD tokens.
pub struct TokenBackend<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for TokenBackend<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: StorageBackend + Clone + 'static> TokenBackend<S> {
    /// Creates a backend persisting through `storage` and reaching the
    /// remote side through `connector`.
    #[must_use]
    pub fn new(
        storage: S,
        connector: Arc<dyn CredentialConnector>,
        settings: BackendSettings,
    ) -> Self {
        let config =
            ConfigStore::new(storage.clone(), settings.ttl_limits(), settings.cas_retry().clone());
        let engine =
            IssuanceEngine::new(settings.retry_policy().clone(), settings.default_token_ttl());
        Self {
            inner: Arc::new(Inner {
                config,
                leases: LeaseRegistry::new(storage),
                connector,
                engine,
            }),
        }
    }

    /// Returns the lease registry.
    #[must_use]
    pub fn leases(&self) -> &LeaseRegistry<S> {
        &self.inner.leases
    }

    // ── Configuration ─────────────────────────────────────────────────

    /// Reads the configuration projection.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::NotConfigured`] before the first write.
    pub async fn read_config(&self) -> Result<ConfigView> {
        Ok(self.inner.config.read().await?.view())
    }

    /// Merges `update` into the configuration.
    pub async fn write_config(&self, update: &ConfigUpdate) -> Result<ConfigView> {
        Ok(self.inner.config.write(update).await?.view())
    }

    /// Like [`write_config`](Self::write_config), from raw request fields.
    pub async fn write_config_fields(&self, data: &FieldData) -> Result<ConfigView> {
        let update = ConfigUpdate::try_from(data)?;
        self.write_config(&update).await
    }

    // ── Issuance ──────────────────────────────────────────────────────

    /// Issues a token for an account from raw request fields.
    pub async fn issue_account_token(
        &self,
        data: &FieldData,
        cancel: CancellationToken,
    ) -> Result<SecretResponse> {
        let request = TokenRequest::account_from_fields(data)?;
        self.issue(&request, cancel).await
    }

    /// Issues a token for a project role from raw request fields.
    pub async fn issue_project_token(
        &self,
        data: &FieldData,
        cancel: CancellationToken,
    ) -> Result<SecretResponse> {
        let request = TokenRequest::project_from_fields(data)?;
        self.issue(&request, cancel).await
    }

    /// Issues a token and records its lease.
    ///
    /// The lease is persisted before this returns. If persisting fails, the
    /// freshly minted token is destroyed again and
    /// [`TokenError::LeaseNotRecorded`] is returned.
    ///
    /// # Errors
    ///
    /// - [`TokenError::NotConfigured`] before the first configuration write
    /// - [`TokenError::Connect`] if no session could be opened
    /// - [`TokenError::MintFailed`] once the retry schedule is exhausted
    /// - [`TokenError::LeaseNotRecorded`] as described above
    #[tracing::instrument(skip(self, request, cancel), fields(principal = %request.principal))]
    pub async fn issue(
        &self,
        request: &TokenRequest,
        cancel: CancellationToken,
    ) -> Result<SecretResponse> {
        let config = self.inner.config.read().await?;
        let kind = request.principal.kind();
        let max_lifetime = config.max_lifetime(kind);

        let port = self
            .inner
            .connector
            .connect(&config, kind, cancel.clone())
            .await
            .map_err(|source| TokenError::Connect {
                principal: request.principal.clone(),
                id: None,
                source,
            })?;

        let issued = match self.inner.engine.issue(port.as_ref(), request, max_lifetime, &cancel).await
        {
            Ok(issued) => issued,
            Err(err) => {
                release(port).await;
                return Err(err);
            },
        };

        let secret = wrap(issued);
        let lease = Lease::for_secret(&secret, Utc::now());

        if let Err(source) = self.inner.leases.record(&lease).await {
            let record = &secret.internal;
            tracing::error!(id = %record.id, error = %source, "failed to record lease, deleting token");
            let compensated = match port.destroy(&record.principal, &record.id).await {
                Ok(()) | Err(PortError::NotFound { .. }) => true,
                Err(err) => {
                    tracing::error!(id = %record.id, error = %err, "compensating delete failed, token is orphaned");
                    false
                },
            };
            release(port).await;
            return Err(TokenError::LeaseNotRecorded {
                id: record.id.clone(),
                principal: record.principal.clone(),
                compensated,
                source,
            });
        }

        release(port).await;
        tracing::info!(
            id = %secret.internal.id,
            secret_type = %secret.secret_type,
            lease_secs = secret.lease.as_secs(),
            "token issued",
        );
        Ok(secret)
    }

    // ── Revocation ────────────────────────────────────────────────────

    /// Revokes a secret from its revocation record.
    ///
    /// This is the host-driven path: the host kept `record` as the secret's
    /// internal state. A lease stored for the same id is removed as well.
    ///
    /// # Errors
    ///
    /// - [`TokenError::InvalidRecord`] if `record` does not match `secret_type`
    /// - the errors of [`secret::revoke`](crate::secret::revoke)
    #[tracing::instrument(skip(self, record, cancel), fields(id = %record.id, secret_type = %secret_type))]
    pub async fn revoke(
        &self,
        secret_type: SecretType,
        record: &RevocationRecord,
        cancel: CancellationToken,
    ) -> Result<()> {
        secret_type.check(record)?;
        let config = self.inner.config.read().await?;
        revoke(self.inner.connector.as_ref(), &config, record, cancel).await?;
        self.forget_lease(record.id.as_str()).await;
        Ok(())
    }

    /// Revokes the stored lease `lease_id`.
    ///
    /// The lease stays in place if the destroy fails, so a later call or
    /// sweep can try again.
    ///
    /// # Errors
    ///
    /// - [`TokenError::LeaseNotFound`] if no such lease is stored
    /// - the errors of [`TokenBackend::revoke`]
    pub async fn revoke_lease(&self, lease_id: &str, cancel: CancellationToken) -> Result<()> {
        let lease = self
            .inner
            .leases
            .get(lease_id)
            .await
            .map_err(|e| TokenError::storage("error while reading lease from storage", e))?
            .ok_or_else(|| TokenError::LeaseNotFound { lease_id: lease_id.to_string() })?;

        let config = self.inner.config.read().await?;
        self.revoke_stored(&config, &lease, cancel).await
    }

    /// Revokes every lease that has expired at `now`.
    ///
    /// Leases are revoked concurrently, one unit of work each. Failures are
    /// collected rather than aborting the sweep.
    ///
    /// # Errors
    ///
    /// Fails only if the configuration or the lease list cannot be read.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn revoke_expired(
        &self,
        now: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Result<RevocationSweep> {
        let expired = self
            .inner
            .leases
            .expired(now)
            .await
            .map_err(|e| TokenError::storage("error while listing leases from storage", e))?;
        let mut sweep = RevocationSweep::default();
        if expired.is_empty() {
            return Ok(sweep);
        }

        let config = Arc::new(self.inner.config.read().await?);
        let mut tasks = JoinSet::new();
        for lease in expired {
            let backend = self.clone();
            let config = Arc::clone(&config);
            let cancel = cancel.child_token();
            tasks.spawn(async move {
                let outcome = backend.revoke_stored(&config, &lease, cancel).await;
                (lease.lease_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((lease_id, Ok(()))) => sweep.revoked.push(lease_id),
                Ok((lease_id, Err(err))) => sweep.failed.push((lease_id, err)),
                Err(err) => tracing::error!(error = %err, "revocation task panicked"),
            }
        }
        sweep.revoked.sort();
        tracing::info!(
            revoked = sweep.revoked.len(),
            failed = sweep.failed.len(),
            "expired lease sweep finished",
        );
        Ok(sweep)
    }

    async fn revoke_stored(
        &self,
        config: &PluginConfig,
        lease: &Lease,
        cancel: CancellationToken,
    ) -> Result<()> {
        lease.secret_type.check(&lease.record)?;
        revoke(self.inner.connector.as_ref(), config, &lease.record, cancel).await?;
        self.forget_lease(&lease.lease_id).await;
        Ok(())
    }

    /// Removes a lease after its token is gone. A lease left behind only
    /// causes a harmless repeated destroy, so failures are logged.
    async fn forget_lease(&self, lease_id: &str) {
        if let Err(err) = self.inner.leases.remove(lease_id).await {
            tracing::warn!(lease_id, error = %err, "failed to remove revoked lease");
        }
    }

    // ── Help ──────────────────────────────────────────────────────────

    /// Returns the mount help text.
    #[must_use]
    pub fn help(&self) -> &'static str {
        BACKEND_HELP
    }

    /// Returns the help for one path.
    #[must_use]
    pub fn path_help(&self, path: HelpPath) -> PathHelp {
        path_help(path)
    }
}
