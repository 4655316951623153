//! Retry schedules for minting and for configuration writes.
//!
//! Minting follows an explicit, ordered schedule of waits carried by
//! [`RetryPolicy`]: one attempt per entry, each preceded by its wait. The
//! default schedule is `0s, 3s, 5s, 10s`, four attempts with about 18s of
//! worst-case latency.
//!
//! Configuration writes are read-modify-write cycles guarded by
//! compare-and-set; [`with_cas_retry`] re-runs the cycle on conflict.

use std::{future::Future, time::Duration};

use argocd_tokens_storage::StorageError;
use fail::fail_point;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ConfigError, TokenError},
    port::PortError,
};

/// Default waits before each mint attempt.
pub const DEFAULT_MINT_WAITS: [Duration; 4] = [
    Duration::ZERO,
    Duration::from_secs(3),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Default number of re-runs after a compare-and-set conflict.
pub const DEFAULT_CAS_RETRIES: u32 = 5;

/// Default base delay between compare-and-set re-runs.
pub const DEFAULT_CAS_BASE_DELAY: Duration = Duration::from_millis(10);

/// Ordered waits, one per mint attempt.
///
/// The first entry is the wait before the first attempt and is normally
/// zero. The number of entries is the total attempt budget.
///
/// Serialized as a list of human readable durations:
///
/// ```json
/// {"waits": ["0s", "3s", "5s", "10s"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(with = "waits_serde")]
    waits: Vec<Duration>,
}

impl RetryPolicy {
    /// Creates a policy from an explicit schedule.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `waits` is empty.
    pub fn new(waits: impl IntoIterator<Item = Duration>) -> Result<Self, ConfigError> {
        let waits: Vec<Duration> = waits.into_iter().collect();
        if waits.is_empty() {
            return Err(ConfigError::BelowMinimum {
                field: "retry_policy.waits",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(Self { waits })
    }

    /// A schedule of `attempts` attempts with no waits at all.
    ///
    /// A zero `attempts` is raised to one.
    #[must_use]
    pub fn immediate(attempts: u32) -> Self {
        Self { waits: vec![Duration::ZERO; attempts.max(1) as usize] }
    }

    /// Returns the wait schedule.
    #[must_use]
    pub fn waits(&self) -> &[Duration] {
        &self.waits
    }

    /// Returns the total attempt budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.waits.len()).unwrap_or(u32::MAX)
    }

    /// Returns the worst-case time spent waiting between attempts.
    #[must_use]
    pub fn total_wait(&self) -> Duration {
        self.waits.iter().sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { waits: DEFAULT_MINT_WAITS.to_vec() }
    }
}

mod waits_serde {
    use super::*;

    pub(super) fn serialize<S: Serializer>(waits: &[Duration], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(waits.iter().map(|w| humantime::format_duration(*w).to_string()))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Duration>, D::Error> {
        let raw = Vec::<String>::deserialize(d)?;
        if raw.is_empty() {
            return Err(serde::de::Error::custom("retry schedule needs at least one attempt"));
        }
        raw.iter()
            .map(|s| humantime::parse_duration(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Compare-and-set retry settings for configuration writes.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
pub struct CasRetryConfig {
    /// Re-runs after the first conflicting attempt.
    #[serde(default = "default_cas_retries")]
    #[builder(default = DEFAULT_CAS_RETRIES)]
    pub max_retries: u32,

    /// Base delay; each re-run waits this plus up to the same again of jitter.
    #[serde(with = "humantime_serde", default = "default_cas_base_delay")]
    #[builder(default = DEFAULT_CAS_BASE_DELAY)]
    pub base_delay: Duration,
}

fn default_cas_retries() -> u32 {
    DEFAULT_CAS_RETRIES
}

fn default_cas_base_delay() -> Duration {
    DEFAULT_CAS_BASE_DELAY
}

impl Default for CasRetryConfig {
    fn default() -> Self {
        Self { max_retries: DEFAULT_CAS_RETRIES, base_delay: DEFAULT_CAS_BASE_DELAY }
    }
}

/// Why a retried mint gave up.
#[derive(Debug)]
pub(crate) struct RetryFailure {
    /// The final attempt's error, verbatim.
    pub(crate) last_error: PortError,
    /// Attempts actually started.
    pub(crate) attempts: u32,
}

/// Runs `operation` on the policy's schedule until it succeeds.
///
/// `operation` receives the 1-based attempt number. Each attempt races the
/// cancellation token, so cancelling drops the in-flight call. Errors that
/// are not [retryable](PortError::is_retryable) stop the loop at once.
#[tracing::instrument(skip(policy, cancel, operation), fields(max_attempts = policy.max_attempts()))]
pub(crate) async fn with_mint_retry<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PortError>>,
{
    let max_attempts = policy.max_attempts();
    let mut last_error: Option<PortError> = None;

    for (attempt, wait) in (1..=max_attempts).zip(policy.waits()) {
        if !wait.is_zero() {
            tracing::debug!(
                operation = operation_name,
                attempt,
                delay_ms = wait.as_millis() as u64,
                "waiting before attempt",
            );
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(RetryFailure { last_error: PortError::Cancelled, attempts: attempt - 1 });
                },
                () = tokio::time::sleep(*wait) => {},
            }
        }
        if cancel.is_cancelled() {
            return Err(RetryFailure { last_error: PortError::Cancelled, attempts: attempt - 1 });
        }

        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(PortError::Cancelled),
            result = operation(attempt) => result,
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            },
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %err,
                    "attempt failed, retrying",
                );
                last_error = Some(err);
            },
            Err(err) => {
                return Err(RetryFailure { last_error: err, attempts: attempt });
            },
        }
    }

    Err(RetryFailure {
        last_error: last_error
            .unwrap_or_else(|| PortError::transport("retry loop completed without result or error")),
        attempts: max_attempts,
    })
}

/// Re-runs a read-modify-write cycle on compare-and-set conflict.
///
/// `operation` performs the whole cycle. Any error other than a storage
/// conflict is returned immediately.
#[tracing::instrument(skip(config, operation), fields(max_retries = config.max_retries))]
pub(crate) async fn with_cas_retry<F, Fut, T>(
    config: &CasRetryConfig,
    mut operation: F,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let is_conflict = |e: &TokenError| {
        matches!(e, TokenError::Storage { source: StorageError::Conflict { .. }, .. })
    };

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if is_conflict(&err) && attempt < config.max_retries => {
                let jitter = if config.base_delay.as_millis() > 0 {
                    let range = config.base_delay.as_millis() as u64;
                    Duration::from_millis(rand::rng().random_range(0..=range))
                } else {
                    Duration::ZERO
                };
                let delay = config.base_delay + jitter;
                tracing::debug!(
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "CAS conflict, retrying after jitter",
                );
                fail_point!("cas-retry-before-sleep");
                tokio::time::sleep(delay).await;
            },
            Err(err) if is_conflict(&err) => break,
            Err(err) => return Err(err),
        }
    }

    Err(TokenError::storage(
        "error while writing config to storage",
        StorageError::cas_retries_exhausted(config.max_retries + 1),
    ))
}
