//! Process-level settings for [`TokenBackend`](crate::TokenBackend).
//!
//! Unlike [`PluginConfig`](crate::PluginConfig), which callers write at
//! runtime, these are fixed when the backend is built: the mint retry
//! schedule, lifetime defaults and ceilings, and the compare-and-set budget
//! for configuration writes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    config::{DEFAULT_MAX_TTL, MAX_TTL_CEILING, TtlLimits},
    error::ConfigError,
    issuance::DEFAULT_TOKEN_TTL,
    retry::{CasRetryConfig, RetryPolicy},
};

/// Settings for a [`TokenBackend`](crate::TokenBackend).
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use argocd_tokens::{BackendSettings, RetryPolicy};
///
/// let settings = BackendSettings::builder()
///     .retry_policy(RetryPolicy::immediate(2))
///     .default_token_ttl(Duration::from_secs(900))
///     .build()?;
/// assert_eq!(settings.retry_policy().max_attempts(), 2);
/// # Ok::<(), argocd_tokens::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSettings {
    /// Waits before each mint attempt.
    #[serde(default)]
    retry_policy: RetryPolicy,

    /// Token lifetime when the caller does not ask for one.
    #[serde(with = "humantime_serde", default = "default_token_ttl")]
    default_token_ttl: Duration,

    /// Per-kind max lifetime when the configuration never set one.
    #[serde(with = "humantime_serde", default = "default_max_ttl")]
    default_max_ttl: Duration,

    /// Upper bound for any configured max lifetime.
    #[serde(with = "humantime_serde", default = "default_max_ttl_ceiling")]
    max_ttl_ceiling: Duration,

    /// Compare-and-set retries for configuration writes.
    #[serde(default)]
    cas_retry: CasRetryConfig,
}

fn default_token_ttl() -> Duration {
    DEFAULT_TOKEN_TTL
}

fn default_max_ttl() -> Duration {
    DEFAULT_MAX_TTL
}

fn default_max_ttl_ceiling() -> Duration {
    MAX_TTL_CEILING
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            default_token_ttl: DEFAULT_TOKEN_TTL,
            default_max_ttl: DEFAULT_MAX_TTL,
            max_ttl_ceiling: MAX_TTL_CEILING,
            cas_retry: CasRetryConfig::default(),
        }
    }
}

#[bon::bon]
impl BackendSettings {
    /// Creates validated settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - any lifetime is under one second
    /// - `default_max_ttl` exceeds `max_ttl_ceiling`
    #[builder]
    pub fn new(
        #[builder(default)] retry_policy: RetryPolicy,
        #[builder(default = DEFAULT_TOKEN_TTL)] default_token_ttl: Duration,
        #[builder(default = DEFAULT_MAX_TTL)] default_max_ttl: Duration,
        #[builder(default = MAX_TTL_CEILING)] max_ttl_ceiling: Duration,
        #[builder(default)] cas_retry: CasRetryConfig,
    ) -> Result<Self, ConfigError> {
        Self { retry_policy, default_token_ttl, default_max_ttl, max_ttl_ceiling, cas_retry }
            .validated()
    }

    /// Checks settings obtained some other way, e.g. deserialized.
    ///
    /// # Errors
    ///
    /// Same as [`BackendSettings::new`].
    pub fn validated(self) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("default_token_ttl", self.default_token_ttl),
            ("default_max_ttl", self.default_max_ttl),
            ("max_ttl_ceiling", self.max_ttl_ceiling),
        ] {
            if value.as_secs() == 0 {
                return Err(ConfigError::MustBePositive {
                    field,
                    value: humantime::format_duration(value).to_string(),
                });
            }
        }
        if self.max_ttl_ceiling < self.default_max_ttl {
            return Err(ConfigError::BelowMinimum {
                field: "max_ttl_ceiling",
                min: humantime::format_duration(self.default_max_ttl).to_string(),
                value: humantime::format_duration(self.max_ttl_ceiling).to_string(),
            });
        }
        Ok(self)
    }

    /// Returns the mint retry schedule.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the default token lifetime.
    #[must_use]
    pub fn default_token_ttl(&self) -> Duration {
        self.default_token_ttl
    }

    /// Returns the default and ceiling for configured max lifetimes.
    #[must_use]
    pub fn ttl_limits(&self) -> TtlLimits {
        TtlLimits { default_max_ttl: self.default_max_ttl, ceiling: self.max_ttl_ceiling }
    }

    /// Returns the compare-and-set retry settings.
    #[must_use]
    pub fn cas_retry(&self) -> &CasRetryConfig {
        &self.cas_retry
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = BackendSettings::builder().build().unwrap();
        assert_eq!(settings, BackendSettings::default());
        assert_eq!(settings.retry_policy().max_attempts(), 4);
        assert_eq!(settings.default_token_ttl(), Duration::from_secs(3600));
        assert_eq!(settings.ttl_limits(), TtlLimits::default());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let err = BackendSettings::builder().default_token_ttl(Duration::ZERO).build().unwrap_err();
        assert_eq!(err, ConfigError::MustBePositive { field: "default_token_ttl", value: "0s".into() });
    }

    #[test]
    fn test_sub_second_ttl_rejected() {
        let err = BackendSettings::builder()
            .default_max_ttl(Duration::from_millis(500))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MustBePositive { field: "default_max_ttl", value: "500ms".into() });
    }

    #[test]
    fn test_ceiling_below_default_rejected() {
        let err = BackendSettings::builder()
            .default_max_ttl(Duration::from_secs(8 * 3600))
            .max_ttl_ceiling(Duration::from_secs(4 * 3600))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "max_ttl_ceiling", .. }));
        assert_eq!(err.to_string(), "max_ttl_ceiling must be at least 8h, got 4h");
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let settings: BackendSettings = serde_json::from_value(serde_json::json!({
            "retry_policy": { "waits": ["0s", "1s"] },
            "default_token_ttl": "30m",
        }))
        .unwrap();
        let settings = settings.validated().unwrap();
        assert_eq!(settings.retry_policy().max_attempts(), 2);
        assert_eq!(settings.default_token_ttl(), Duration::from_secs(1800));
        assert_eq!(settings.ttl_limits().ceiling, MAX_TTL_CEILING);
    }

    #[test]
    fn test_unknown_setting_rejected() {
        let result = serde_json::from_value::<BackendSettings>(serde_json::json!({ "retries": 3 }));
        assert!(result.is_err());
    }
}
