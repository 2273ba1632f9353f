// Guarded-call wrapper: runs an operation only while a lease on its derived
// keys is held.

use crate::{
    engine::QuorumLockEngine,
    hooks::HookEvent,
    keys::{CallIdentity, KeySpec},
    settings::SettingsOverride,
    Error, Result,
};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// What to do when quorum acquisition fails.
///
/// Timeouts are never downgraded: a timeout may mean the operation itself is
/// stuck, not merely that coordination is slow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Log the quorum failure and run the operation unprotected, trading
    /// strict exclusivity for availability.
    #[default]
    RunUnlocked,
    /// Surface the quorum failure to the caller.
    Propagate,
}

/// Per-invocation state: start instant, cancellation signal, and the armed
/// deadline task. Dropping the scope disarms the timer, so it is released on
/// every exit path.
struct OperationScope {
    started: Instant,
    cancel: CancellationToken,
    timer: tokio::task::JoinHandle<()>,
}

impl OperationScope {
    fn arm(deadline: Duration) -> Self {
        let cancel = CancellationToken::new();
        let timer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(deadline).await;
                cancel.cancel();
            }
        });
        Self {
            started: Instant::now(),
            cancel,
            timer,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Builder for one guarded invocation.
///
/// A single deadline of `max(timeout_multiplier * ttl, minimum_timeout)`
/// governs the whole call, acquisition included. The operation receives a
/// child cancellation token for cooperative cancellation.
pub struct GuardedCall<'e> {
    engine: &'e QuorumLockEngine,
    keys: KeySpec,
    identity: CallIdentity,
    args: Vec<String>,
    ttl: Option<Duration>,
    overrides: SettingsOverride,
    fallback: FallbackPolicy,
}

impl<'e> GuardedCall<'e> {
    pub fn new(engine: &'e QuorumLockEngine, identity: CallIdentity, keys: KeySpec) -> Self {
        Self {
            engine,
            keys,
            identity,
            args: Vec::new(),
            ttl: None,
            overrides: SettingsOverride::default(),
            fallback: FallbackPolicy::default(),
        }
    }

    /// Call arguments handed to a `KeySpec::Derive` function.
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn settings(mut self, overrides: SettingsOverride) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Run `operation` under a live lease on the resolved keys.
    pub async fn run<T, F, Fut>(self, operation: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let settings = self.overrides.apply(self.engine.settings());
        let ttl = self.ttl.unwrap_or(settings.ttl);
        let keys = self.keys.resolve(&self.identity, &self.args);

        if keys.is_empty() {
            // Nothing to lock on; a zero-resource lease is meaningless.
            warn!(identity = %self.identity, "key resolution produced no keys, running unguarded");
            return operation(CancellationToken::new()).await;
        }

        let scope = OperationScope::arm(settings.call_deadline(ttl));

        self.engine.hooks().fire_pre_acquire(&HookEvent {
            keys: keys.clone(),
            ttl,
            elapsed: Duration::ZERO,
        });

        let acquired = self
            .engine
            .acquire_with(&keys, ttl, &self.overrides, &scope.cancel)
            .await;

        let lease = match acquired {
            Ok(lease) => lease,
            Err(err) => {
                self.engine.hooks().fire_on_released(&HookEvent {
                    keys: keys.clone(),
                    ttl,
                    elapsed: scope.elapsed(),
                });
                return handle_unacquired(err, self.fallback, &scope, operation).await;
            }
        };

        self.engine.hooks().fire_on_acquired(&HookEvent {
            keys: keys.clone(),
            ttl,
            elapsed: scope.elapsed(),
        });

        let mut lease = lease;
        let result = {
            let keeper = keep_alive(
                self.engine,
                &mut lease,
                settings.automatic_extension_threshold,
                &self.overrides,
                &scope.cancel,
            );
            tokio::pin!(keeper);
            tokio::select! {
                result = operation(scope.cancel.child_token()) => result,
                () = &mut keeper => unreachable!("lease keeper never completes"),
            }
        };

        self.engine.hooks().fire_on_released(&HookEvent {
            keys,
            ttl,
            elapsed: scope.elapsed(),
        });
        self.engine.release(&lease).await;

        // An operation that honored the deadline's cancellation reports as a
        // timeout; any other outcome of the operation stands as-is.
        match result {
            Err(Error::Cancelled) if scope.cancel.is_cancelled() => {
                let elapsed = scope.elapsed();
                error!(?elapsed, "guarded operation timed out");
                Err(Error::Timeout { elapsed })
            }
            other => other,
        }
    }
}

/// Extends the lease whenever its remaining validity drops below the
/// threshold, for as long as the operation runs. Never completes; extension
/// failure only stops further extensions, the operation's own result still
/// governs the call.
async fn keep_alive(
    engine: &QuorumLockEngine,
    lease: &mut crate::Lease,
    threshold: Duration,
    overrides: &SettingsOverride,
    cancel: &CancellationToken,
) {
    if !threshold.is_zero() {
        loop {
            let wait = lease.time_remaining().saturating_sub(threshold);
            // floor keeps a too-short validity window from degenerating
            // into a hot extension loop
            tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
            match engine.extend_with(lease, overrides, cancel).await {
                Ok(extended) => *lease = extended,
                Err(err) => {
                    warn!(%err, keys = ?lease.resource_keys, "automatic lease extension failed");
                    break;
                }
            }
        }
    }
    futures::future::pending::<()>().await;
}

/// Failure path before a lease was ever held: map cancellation to a timeout
/// and apply the fallback policy to quorum failures.
async fn handle_unacquired<T, F, Fut>(
    err: Error,
    fallback: FallbackPolicy,
    scope: &OperationScope,
    operation: F,
) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match err {
        Error::Cancelled => {
            let elapsed = scope.elapsed();
            error!(?elapsed, "guarded call timed out during acquisition");
            Err(Error::Timeout { elapsed })
        }
        Error::Quorum { granted, needed, attempts } => match fallback {
            FallbackPolicy::RunUnlocked => {
                error!(granted, needed, attempts, "quorum failure, executing without lock");
                // the degraded path reports a fired deadline the same way
                // the leased path does
                match operation(scope.cancel.child_token()).await {
                    Err(Error::Cancelled) if scope.cancel.is_cancelled() => {
                        let elapsed = scope.elapsed();
                        error!(?elapsed, "degraded operation timed out");
                        Err(Error::Timeout { elapsed })
                    }
                    other => other,
                }
            }
            FallbackPolicy::Propagate => Err(Error::Quorum { granted, needed, attempts }),
        },
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LockSettings;
    use crate::store::LeaseStore;
    use crate::test_utils::sim_cluster;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn engine(settings: LockSettings) -> (Vec<Arc<crate::test_utils::SimulatedStore>>, QuorumLockEngine) {
        let stores = sim_cluster(3);
        let dyn_stores = stores
            .iter()
            .map(|store| Arc::clone(store) as Arc<dyn LeaseStore>)
            .collect();
        (stores, QuorumLockEngine::new(dyn_stores, settings))
    }

    fn fast_settings() -> LockSettings {
        LockSettings {
            retry_count: 1,
            retry_delay: Duration::from_millis(5),
            retry_jitter: Duration::from_millis(2),
            ..LockSettings::default()
        }
    }

    #[tokio::test]
    async fn test_operation_runs_under_lease() {
        let (stores, engine) = engine(fast_settings());
        let identity = CallIdentity::new("Order", "charge");

        let holders = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = holders.clone();
        let probe = stores[0].clone();

        let result = GuardedCall::new(&engine, identity, KeySpec::Static("orders".to_string()))
            .run(|_cancel| async move {
                seen.lock().push(probe.holder("orders"));
                Ok(42)
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        // entry existed while the operation ran, and is gone afterwards
        assert!(holders.lock()[0].is_some());
        assert_eq!(stores[0].holder("orders"), None);
    }

    #[tokio::test]
    async fn test_empty_key_set_runs_unguarded() {
        let (stores, engine) = engine(fast_settings());
        let identity = CallIdentity::new("Order", "charge");

        let result = GuardedCall::new(&engine, identity, KeySpec::derive(|_| Vec::new()))
            .run(|_cancel| async move { Ok("ok") })
            .await
            .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(stores[0].holder("orders"), None);
    }

    #[tokio::test]
    async fn test_operation_error_propagates_after_release() {
        let (stores, engine) = engine(fast_settings());
        let identity = CallIdentity::new("Order", "charge");

        let result: Result<()> =
            GuardedCall::new(&engine, identity, KeySpec::Static("orders".to_string()))
                .run(|_cancel| async move { Err(Error::operation("boom")) })
                .await;

        assert!(matches!(result, Err(Error::Operation(_))));
        assert_eq!(stores[0].holder("orders"), None);
    }

    #[tokio::test]
    async fn test_fallback_propagate_surfaces_quorum_failure() {
        let (stores, engine) = engine(fast_settings());
        for store in &stores {
            store.set_unreachable();
        }
        let identity = CallIdentity::new("Order", "charge");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<()> =
            GuardedCall::new(&engine, identity, KeySpec::Static("orders".to_string()))
                .fallback(FallbackPolicy::Propagate)
                .run(|_cancel| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;

        assert!(matches!(result, Err(Error::Quorum { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
