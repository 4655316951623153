//! Persisted plugin configuration.
//!
//! The configuration names the remote endpoint, holds the admin token and
//! sets the lifetime ceiling for each credential kind. It is written with
//! merge semantics: fields left out of an update keep their stored value.
//!
//! Every write is a single read-modify-write cycle committed with
//! compare-and-set, so two racing writers cannot lose each other's fields.

use std::{fmt, time::Duration};

use argocd_tokens_storage::StorageBackend;
use bytes::Bytes;
use fail::fail_point;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    error::{ConfigError, Result, TokenError},
    principal::PrincipalKind,
    retry::{CasRetryConfig, with_cas_retry},
};

/// Storage key of the configuration record.
pub const CONFIG_KEY: &[u8] = b"config";

/// Max lifetime applied to a credential kind that was never given one.
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Hard ceiling for any configured max lifetime.
pub const MAX_TTL_CEILING: Duration = Duration::from_secs(12 * 60 * 60);

/// The stored configuration.
///
/// Decoding is lenient: unknown fields are ignored and missing ones take
/// their zero value. A zero max lifetime is read back as the default.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Remote address, `host` or `host:port`, without a scheme.
    pub argo_cd_url: String,
    /// Token of an account with admin rights on the remote instance.
    pub admin_token: Zeroizing<String>,
    /// Ceiling for account token lifetimes.
    #[serde(with = "humantime_serde")]
    pub account_token_max_ttl: Duration,
    /// Ceiling for project token lifetimes.
    #[serde(with = "humantime_serde")]
    pub project_token_max_ttl: Duration,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// Use plain HTTP.
    pub plaintext: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            argo_cd_url: String::new(),
            admin_token: Zeroizing::new(String::new()),
            account_token_max_ttl: Duration::ZERO,
            project_token_max_ttl: Duration::ZERO,
            insecure: false,
            plaintext: false,
        }
    }
}

impl fmt::Debug for PluginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginConfig")
            .field("argo_cd_url", &self.argo_cd_url)
            .field("admin_token", &"[REDACTED]")
            .field("account_token_max_ttl", &self.account_token_max_ttl)
            .field("project_token_max_ttl", &self.project_token_max_ttl)
            .field("insecure", &self.insecure)
            .field("plaintext", &self.plaintext)
            .finish()
    }
}

impl PluginConfig {
    /// Returns the lifetime ceiling for `kind`.
    #[must_use]
    pub fn max_lifetime(&self, kind: PrincipalKind) -> Duration {
        match kind {
            PrincipalKind::Account => self.account_token_max_ttl,
            PrincipalKind::ProjectRole => self.project_token_max_ttl,
        }
    }

    /// Returns the read projection, which leaves out the admin token.
    #[must_use]
    pub fn view(&self) -> ConfigView {
        ConfigView {
            argo_cd_url: self.argo_cd_url.clone(),
            account_token_max_ttl: humantime::format_duration(self.account_token_max_ttl)
                .to_string(),
            project_token_max_ttl: humantime::format_duration(self.project_token_max_ttl)
                .to_string(),
            insecure: self.insecure,
            plaintext: self.plaintext,
        }
    }

    /// Applies `update` on top of `previous` and validates the result.
    ///
    /// Required fields must come from either side. Max lifetimes fall back to
    /// `limits.default_max_ttl` and are clamped to `limits.ceiling`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingRequired`] if the endpoint or admin token is on neither side
    /// - [`ConfigError::InvalidEndpoint`] if the merged endpoint is not a bare address
    pub fn merge(
        previous: Option<&PluginConfig>,
        update: &ConfigUpdate,
        limits: &TtlLimits,
    ) -> std::result::Result<Self, ConfigError> {
        let argo_cd_url = update
            .argo_cd_url
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| previous.map(|p| p.argo_cd_url.clone()).filter(|u| !u.is_empty()))
            .ok_or(ConfigError::MissingRequired { field: "argo_cd_url" })?;

        let admin_token = update
            .admin_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| previous.map(|p| p.admin_token.clone()).filter(|t| !t.is_empty()))
            .ok_or(ConfigError::MissingRequired { field: "admin_token" })?;

        validate_endpoint(&argo_cd_url)?;

        let ttl = |requested: Option<Duration>, stored: Option<Duration>| {
            limits.clamp(whole_seconds(requested).or(whole_seconds(stored)))
        };

        Ok(Self {
            argo_cd_url,
            admin_token,
            account_token_max_ttl: ttl(
                update.account_token_max_ttl,
                previous.map(|p| p.account_token_max_ttl),
            ),
            project_token_max_ttl: ttl(
                update.project_token_max_ttl,
                previous.map(|p| p.project_token_max_ttl),
            ),
            insecure: update.insecure.or(previous.map(|p| p.insecure)).unwrap_or(false),
            plaintext: update.plaintext.or(previous.map(|p| p.plaintext)).unwrap_or(false),
        })
    }

    fn normalized(mut self, limits: &TtlLimits) -> Self {
        self.account_token_max_ttl = limits.clamp(whole_seconds(Some(self.account_token_max_ttl)));
        self.project_token_max_ttl = limits.clamp(whole_seconds(Some(self.project_token_max_ttl)));
        self
    }
}

/// A partial configuration update. `None` leaves the stored value alone.
#[derive(Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct ConfigUpdate {
    /// New remote address.
    #[builder(into)]
    pub argo_cd_url: Option<String>,
    /// New admin token.
    #[builder(with = |token: impl Into<String>| Zeroizing::new(token.into()))]
    pub admin_token: Option<Zeroizing<String>>,
    /// New account token ceiling.
    pub account_token_max_ttl: Option<Duration>,
    /// New project token ceiling.
    pub project_token_max_ttl: Option<Duration>,
    /// New `insecure` flag.
    pub insecure: Option<bool>,
    /// New `plaintext` flag.
    pub plaintext: Option<bool>,
}

impl fmt::Debug for ConfigUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigUpdate")
            .field("argo_cd_url", &self.argo_cd_url)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[REDACTED]"))
            .field("account_token_max_ttl", &self.account_token_max_ttl)
            .field("project_token_max_ttl", &self.project_token_max_ttl)
            .field("insecure", &self.insecure)
            .field("plaintext", &self.plaintext)
            .finish()
    }
}

/// What a configuration read returns. Never carries the admin token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigView {
    /// Remote address.
    pub argo_cd_url: String,
    /// Account token ceiling, human readable.
    pub account_token_max_ttl: String,
    /// Project token ceiling, human readable.
    pub project_token_max_ttl: String,
    /// Whether TLS verification is skipped.
    pub insecure: bool,
    /// Whether plain HTTP is used.
    pub plaintext: bool,
}

/// Default and ceiling for configured max lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlLimits {
    /// Used when no max lifetime was ever configured.
    pub default_max_ttl: Duration,
    /// No configured max lifetime may exceed this.
    pub ceiling: Duration,
}

impl TtlLimits {
    fn clamp(&self, value: Option<Duration>) -> Duration {
        value.unwrap_or(self.default_max_ttl).min(self.ceiling)
    }
}

impl Default for TtlLimits {
    fn default() -> Self {
        Self { default_max_ttl: DEFAULT_MAX_TTL, ceiling: MAX_TTL_CEILING }
    }
}

/// Truncates a max TTL to whole seconds; anything under one second is unset.
fn whole_seconds(value: Option<Duration>) -> Option<Duration> {
    value.map(|d| Duration::from_secs(d.as_secs())).filter(|d| !d.is_zero())
}

/// Checks that `endpoint` is a bare `host[:port]` address.
///
/// The check is case-insensitive. It rejects anything carrying a scheme or
/// a protocol token, anything with path, query or userinfo characters, and
/// hosts without a `.` domain separator.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEndpoint`] naming the rule that failed.
pub fn validate_endpoint(endpoint: &str) -> std::result::Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidEndpoint { endpoint: endpoint.to_string(), reason };
    let lowered = endpoint.to_ascii_lowercase();

    if lowered.trim().is_empty() {
        return Err(invalid("address is empty"));
    }
    if lowered.contains("://") {
        return Err(invalid("address contains a URL scheme"));
    }
    if lowered.contains("http") || lowered.contains("tcp") {
        return Err(invalid("address contains a transport protocol token"));
    }
    if lowered.chars().any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@' | '\\')) {
        return Err(invalid("address must be host or host:port only"));
    }

    let host = match lowered.rsplit_once(':') {
        Some((host, port)) => {
            if !port.parse::<u16>().is_ok_and(|p| p != 0) {
                return Err(invalid("address has an invalid port"));
            }
            host
        },
        None => lowered.as_str(),
    };
    if host.is_empty() || host.contains(':') {
        return Err(invalid("address has an invalid host"));
    }
    if !host.contains('.') {
        return Err(invalid("address is missing a domain separator"));
    }
    Ok(())
}

/// Reads and writes [`PluginConfig`] through a [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct ConfigStore<S> {
    storage: S,
    limits: TtlLimits,
    cas: CasRetryConfig,
}

impl<S: StorageBackend> ConfigStore<S> {
    /// Creates a store.
    #[must_use]
    pub fn new(storage: S, limits: TtlLimits, cas: CasRetryConfig) -> Self {
        Self { storage, limits, cas }
    }

    async fn load(&self) -> Result<Option<(PluginConfig, Bytes)>> {
        self.storage
            .get_json::<PluginConfig>(CONFIG_KEY)
            .await
            .map_err(|e| TokenError::storage("error while reading config from storage", e))
    }

    /// Returns the stored configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::NotConfigured`] if nothing was ever written.
    #[tracing::instrument(skip(self))]
    pub async fn read(&self) -> Result<PluginConfig> {
        match self.load().await? {
            Some((config, _)) => Ok(config.normalized(&self.limits)),
            None => Err(TokenError::NotConfigured),
        }
    }

    /// Merges `update` into the stored configuration and commits it.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Config`] if the merged configuration is invalid; nothing is written
    /// - [`TokenError::Storage`] if the commit failed or kept conflicting
    #[tracing::instrument(skip(self, update))]
    pub async fn write(&self, update: &ConfigUpdate) -> Result<PluginConfig> {
        let config = with_cas_retry(&self.cas, move || self.write_once(update)).await?;

        if config.insecure {
            tracing::warn!(
                argo_cd_url = %config.argo_cd_url,
                "argo cd configured with insecure connection, this should not be used in production",
            );
        }
        if config.plaintext {
            tracing::warn!(
                argo_cd_url = %config.argo_cd_url,
                "argo cd configured with plaintext communication, this should not be used in production",
            );
        }
        tracing::info!(argo_cd_url = %config.argo_cd_url, "config written");
        Ok(config)
    }

    async fn write_once(&self, update: &ConfigUpdate) -> Result<PluginConfig> {
        let current = self.load().await?;
        let (previous, raw) = match &current {
            Some((config, raw)) => (Some(config), Some(raw.as_ref())),
            None => (None, None),
        };

        let merged = PluginConfig::merge(previous, update, &self.limits)?;

        fail_point!("config-before-commit", |_| {
            Err(TokenError::storage(
                "error while writing config to storage",
                argocd_tokens_storage::StorageError::internal("injected commit failure"),
            ))
        });
        self.storage
            .compare_and_set_json(CONFIG_KEY, raw, &merged)
            .await
            .map_err(|e| TokenError::storage("error while writing config to storage", e))?;
        Ok(merged)
    }
}
