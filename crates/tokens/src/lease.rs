//! Persisted leases.
//!
//! Every issued secret gets a [`Lease`] under `leases/<id>` before the
//! issuance response leaves the engine. The lease survives restarts and
//! drives revocation: on expiry or an explicit revoke, its revocation record
//! is replayed against the remote side and the lease is removed only after
//! the destroy succeeded.

use std::time::Duration;

use argocd_tokens_storage::{StorageBackend, StorageResult, decode_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::secret::{RevocationRecord, SecretResponse, SecretType};

/// Key prefix of lease records.
pub const LEASE_PREFIX: &str = "leases/";

/// A persisted lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Lease id, equal to the credential id.
    pub lease_id: String,
    /// Secret type the lease was filed under.
    pub secret_type: SecretType,
    /// What revocation replays.
    pub record: RevocationRecord,
    /// Lease duration.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// When the credential was issued.
    pub issued_at: DateTime<Utc>,
}

impl Lease {
    /// Creates the lease for a freshly wrapped secret.
    #[must_use]
    pub fn for_secret(secret: &SecretResponse, issued_at: DateTime<Utc>) -> Self {
        Self {
            lease_id: secret.internal.id.to_string(),
            secret_type: secret.secret_type,
            record: secret.internal.clone(),
            ttl: secret.lease,
            issued_at,
        }
    }

    /// Returns when the lease runs out.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns `true` once `now` has reached the expiry time.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

fn lease_key(lease_id: &str) -> Vec<u8> {
    format!("{LEASE_PREFIX}{lease_id}").into_bytes()
}

/// Lease storage over a [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct LeaseRegistry<S> {
    storage: S,
}

impl<S: StorageBackend> LeaseRegistry<S> {
    /// Creates a registry.
    #[must_use]
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Stores a new lease.
    ///
    /// Insert-only: an existing lease with the same id is never overwritten
    /// and the call fails with a conflict instead.
    pub async fn record(&self, lease: &Lease) -> StorageResult<()> {
        self.storage.compare_and_set_json(&lease_key(&lease.lease_id), None, lease).await
    }

    /// Loads one lease.
    pub async fn get(&self, lease_id: &str) -> StorageResult<Option<Lease>> {
        Ok(self.storage.get_json::<Lease>(&lease_key(lease_id)).await?.map(|(lease, _)| lease))
    }

    /// Deletes a lease. Deleting an absent lease is a no-op.
    pub async fn remove(&self, lease_id: &str) -> StorageResult<()> {
        self.storage.delete(&lease_key(lease_id)).await
    }

    /// Loads every lease, skipping records that cannot be decoded.
    pub async fn list(&self) -> StorageResult<Vec<Lease>> {
        let entries = self.storage.list_prefix(LEASE_PREFIX.as_bytes()).await?;
        let mut leases = Vec::with_capacity(entries.len());
        for entry in entries {
            match decode_json::<Lease>(&entry.key, &entry.value) {
                Ok(lease) => leases.push(lease),
                Err(err) => {
                    tracing::warn!(key = %entry.key_lossy(), error = %err, "skipping unreadable lease");
                },
            }
        }
        Ok(leases)
    }

    /// Loads the leases that have expired at `now`.
    pub async fn expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<Lease>> {
        Ok(self.list().await?.into_iter().filter(|lease| lease.is_expired(now)).collect())
    }
}
