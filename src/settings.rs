use crate::lease::DEFAULT_LEASE_TTL;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide lock protocol configuration.
///
/// Durations deserialize in serde's native `{ "secs": _, "nanos": _ }` form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Default lease duration when the caller does not override it.
    pub ttl: Duration,

    /// Acquisition rounds retried after the first failed one.
    pub retry_count: u32,

    /// Base delay between acquisition rounds.
    pub retry_delay: Duration,

    /// Uniform jitter applied to `retry_delay`, in both directions.
    pub retry_jitter: Duration,

    /// Fractional TTL compensation for clock skew across stores.
    pub drift_factor: f64,

    /// Fixed drift compensation added on top of the factor.
    pub clock_drift_constant: Duration,

    /// While a guarded operation runs, its lease is extended whenever the
    /// remaining validity drops below this threshold. Zero disables
    /// automatic extension.
    pub automatic_extension_threshold: Duration,

    /// The guarded-call deadline is `timeout_multiplier * ttl`, floored at
    /// `minimum_timeout`. The multiplier leaves a safety margin over raw
    /// acquisition plus execution time.
    pub timeout_multiplier: u32,
    pub minimum_timeout: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LEASE_TTL,
            retry_count: 10,
            retry_delay: Duration::from_millis(200),
            retry_jitter: Duration::from_millis(100),
            drift_factor: 0.01,
            clock_drift_constant: Duration::from_millis(2),
            automatic_extension_threshold: Duration::from_millis(500),
            timeout_multiplier: 2,
            minimum_timeout: Duration::from_secs(1),
        }
    }
}

impl LockSettings {
    /// Drift allowance for a lease of the given nominal TTL:
    /// `ttl * drift_factor + clock_drift_constant`.
    pub fn drift(&self, ttl: Duration) -> Duration {
        ttl.mul_f64(self.drift_factor) + self.clock_drift_constant
    }

    /// Absolute deadline budget for a guarded call using the given TTL.
    pub fn call_deadline(&self, ttl: Duration) -> Duration {
        (ttl * self.timeout_multiplier).max(self.minimum_timeout)
    }
}

/// Per-call overrides merged onto the engine's defaults. Unset fields keep
/// the engine value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsOverride {
    pub retry_count: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub retry_jitter: Option<Duration>,
    pub drift_factor: Option<f64>,
    pub automatic_extension_threshold: Option<Duration>,
}

impl SettingsOverride {
    pub fn apply(&self, base: &LockSettings) -> LockSettings {
        let mut effective = base.clone();
        if let Some(retry_count) = self.retry_count {
            effective.retry_count = retry_count;
        }
        if let Some(retry_delay) = self.retry_delay {
            effective.retry_delay = retry_delay;
        }
        if let Some(retry_jitter) = self.retry_jitter {
            effective.retry_jitter = retry_jitter;
        }
        if let Some(drift_factor) = self.drift_factor {
            effective.drift_factor = drift_factor;
        }
        if let Some(threshold) = self.automatic_extension_threshold {
            effective.automatic_extension_threshold = threshold;
        }
        effective
    }
}
