// Core lease data structures

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default lease duration (5 seconds)
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(5);

/// A time-bounded, token-authenticated mutual-exclusion grant on a set of
/// resource keys.
///
/// The lease is owned exclusively by the call that acquired it. It is either
/// released by that call or reclaimed by natural TTL expiry at each store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Resource keys, in canonical (sorted) order. Order is part of the
    /// lease identity: consistent ordering across callers prevents
    /// circular-wait.
    pub resource_keys: Vec<String>,

    /// Opaque ownership token, unique per acquisition. Stores only extend or
    /// delete an entry whose stored value matches this token.
    pub value: String,

    /// Wall-clock time the lease was granted.
    pub acquired_at: DateTime<Utc>,

    /// Nominal duration requested at acquisition.
    pub ttl: Duration,

    /// Monotonic expiry, already adjusted for elapsed round time and clock
    /// drift.
    pub expires_at: Instant,

    /// Number of times the lease has been extended.
    pub extension_count: u32,
}

impl Lease {
    pub(crate) fn new(resource_keys: Vec<String>, value: String, ttl: Duration, validity: Duration) -> Self {
        Self {
            resource_keys,
            value,
            acquired_at: Utc::now(),
            ttl,
            expires_at: Instant::now() + validity,
            extension_count: 0,
        }
    }

    /// Check whether the drift-adjusted validity window has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time remaining until expiry, zero if already expired.
    pub fn time_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Successor lease produced by a successful extension round. Keeps the
    /// ownership token, moves the expiry forward.
    pub(crate) fn extended(&self, validity: Duration) -> Self {
        Self {
            resource_keys: self.resource_keys.clone(),
            value: self.value.clone(),
            acquired_at: self.acquired_at,
            ttl: self.ttl,
            expires_at: Instant::now() + validity,
            extension_count: self.extension_count + 1,
        }
    }
}

/// Generate a fresh ownership token. Uniqueness across concurrent attempts is
/// what makes conditional release/extend safe.
pub(crate) fn new_token() -> String {
    Uuid::new_v4().to_string()
}
