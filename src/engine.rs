// Quorum lock engine - drives the acquire/extend/release lease protocol
// across N independent stores.

use crate::{
    hooks::HookSet,
    lease::{self, Lease},
    settings::{LockSettings, SettingsOverride},
    store::LeaseStore,
    Error, Result,
};
use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Whether a round creates entries or extends ones we already own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundKind {
    Acquire,
    Extend,
}

/// Outcome of one protocol round that did not produce a lease.
enum RoundFailure {
    /// Fewer than quorum stores granted, or the validity window closed.
    Rejected { granted: usize },
    /// The cancellation signal fired mid-round.
    Cancelled,
}

/// Coordinates mutually-exclusive leases across a quorum of independent
/// lease stores.
///
/// The engine holds no per-lease state: every `Lease` is owned by the call
/// that acquired it, and contention between callers is resolved by the
/// stores' atomic set-if-absent semantics, not by in-process queuing.
#[derive(Debug)]
pub struct QuorumLockEngine {
    stores: Vec<Arc<dyn LeaseStore>>,
    settings: LockSettings,
    hooks: HookSet,
}

impl QuorumLockEngine {
    pub fn new(stores: Vec<Arc<dyn LeaseStore>>, settings: LockSettings) -> Self {
        assert!(!stores.is_empty(), "at least one lease store is required");
        Self {
            stores,
            settings,
            hooks: HookSet::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    pub(crate) fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    /// Minimum number of stores that must grant for a lock decision to be
    /// considered safe: floor(N/2) + 1.
    pub fn quorum(&self) -> usize {
        self.stores.len() / 2 + 1
    }

    /// Acquire a lease on `keys` using the engine's default settings.
    pub async fn acquire(
        &self,
        keys: &[String],
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<Lease> {
        self.acquire_with(keys, ttl, &SettingsOverride::default(), cancel).await
    }

    /// Acquire a lease on `keys`, retrying failed rounds up to
    /// `retry_count` times with jittered backoff.
    ///
    /// One fresh ownership token covers the whole retry chain, so a store
    /// that granted in an earlier failed round simply re-grants.
    pub async fn acquire_with(
        &self,
        keys: &[String],
        ttl: Duration,
        overrides: &SettingsOverride,
        cancel: &CancellationToken,
    ) -> Result<Lease> {
        let settings = overrides.apply(&self.settings);
        let token = lease::new_token();
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempts += 1;

            let granted = match self.round(keys, &token, ttl, RoundKind::Acquire, &settings, cancel).await {
                Ok(validity) => {
                    debug!(?keys, ?validity, attempts, "lease acquired");
                    return Ok(Lease::new(keys.to_vec(), token, ttl, validity));
                }
                Err(RoundFailure::Cancelled) => return Err(Error::Cancelled),
                Err(RoundFailure::Rejected { granted }) => {
                    debug!(?keys, granted, needed = self.quorum(), attempts, "acquisition round rejected");
                    granted
                }
            };

            if attempts > settings.retry_count {
                return Err(Error::Quorum {
                    granted,
                    needed: self.quorum(),
                    attempts,
                });
            }

            let backoff = jittered(settings.retry_delay, settings.retry_jitter);
            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// Extend a held lease using the engine's default settings.
    pub async fn extend(&self, lease: &Lease, cancel: &CancellationToken) -> Result<Lease> {
        self.extend_with(lease, &SettingsOverride::default(), cancel).await
    }

    /// Extend a held lease in place, keeping its ownership token.
    ///
    /// Runs the same quorum protocol with set-if-owner: only stores that
    /// still hold our token re-arm their TTL.
    pub async fn extend_with(
        &self,
        lease: &Lease,
        overrides: &SettingsOverride,
        cancel: &CancellationToken,
    ) -> Result<Lease> {
        if lease.is_expired() {
            return Err(Error::LeaseExpired);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let settings = overrides.apply(&self.settings);
        match self
            .round(&lease.resource_keys, &lease.value, lease.ttl, RoundKind::Extend, &settings, cancel)
            .await
        {
            Ok(validity) => Ok(lease.extended(validity)),
            Err(RoundFailure::Cancelled) => Err(Error::Cancelled),
            Err(RoundFailure::Rejected { granted }) => Err(Error::Quorum {
                granted,
                needed: self.quorum(),
                attempts: 1,
            }),
        }
    }

    /// Best-effort release against all stores. Individual store failures are
    /// logged, never escalated: natural TTL expiry is the safety net.
    pub async fn release(&self, lease: &Lease) {
        self.release_token(&lease.resource_keys, &lease.value).await;
    }

    /// One concurrent fan-out to all stores. Returns the drift-adjusted
    /// validity window on success.
    async fn round(
        &self,
        keys: &[String],
        value: &str,
        ttl: Duration,
        kind: RoundKind,
        settings: &LockSettings,
        cancel: &CancellationToken,
    ) -> std::result::Result<Duration, RoundFailure> {
        let started = Instant::now();

        let requests = self.stores.iter().map(|store| {
            let store = Arc::clone(store);
            async move {
                for key in keys {
                    let granted = match kind {
                        RoundKind::Acquire => store.set_if_absent(key, value, ttl).await,
                        RoundKind::Extend => store.set_if_owner(key, value, ttl).await,
                    };
                    match granted {
                        Ok(true) => {}
                        Ok(false) => return false,
                        Err(err) => {
                            debug!(%err, %key, "store request failed, counting as not granted");
                            return false;
                        }
                    }
                }
                true
            }
        });

        // In-flight store calls are abandoned, not awaited, when the signal
        // fires mid-round.
        let grants: Vec<bool> = tokio::select! {
            grants = join_all(requests) => grants,
            () = cancel.cancelled() => {
                self.release_token(keys, value).await;
                return Err(RoundFailure::Cancelled);
            }
        };

        let granted = grants.into_iter().filter(|granted| *granted).count();
        let elapsed = started.elapsed();
        let drift = settings.drift(ttl);
        let validity = ttl.saturating_sub(elapsed).saturating_sub(drift);

        if granted >= self.quorum() && !validity.is_zero() {
            Ok(validity)
        } else {
            // Clean up everything this token may hold. delete-if-owner is a
            // no-op on stores that never granted.
            self.release_token(keys, value).await;
            Err(RoundFailure::Rejected { granted })
        }
    }

    async fn release_token(&self, keys: &[String], value: &str) {
        let deletes = self.stores.iter().map(|store| {
            let store = Arc::clone(store);
            async move {
                for key in keys {
                    if let Err(err) = store.delete_if_owner(key, value).await {
                        warn!(%err, %key, "best-effort release failed");
                    }
                }
            }
        });
        join_all(deletes).await;
    }
}

/// `delay ± jitter`, uniform, floored at zero.
fn jittered(delay: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return delay;
    }
    let jitter_ms = i64::try_from(jitter.as_millis()).unwrap_or(i64::MAX);
    let offset = rand::thread_rng().gen_range(-jitter_ms..=jitter_ms);
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    Duration::from_millis(delay_ms.saturating_add(offset).max(0) as u64)
}
