use quorlock::{
    test_utils::{as_stores, sim_cluster},
    Error, LockSettings, QuorumLockEngine,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_settings() -> LockSettings {
    LockSettings {
        retry_count: 2,
        retry_delay: Duration::from_millis(10),
        retry_jitter: Duration::from_millis(5),
        ..LockSettings::default()
    }
}

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

#[tokio::test]
async fn test_five_stores_two_unreachable_still_acquires() {
    let cluster = sim_cluster(5);
    cluster[0].set_unreachable();
    cluster[1].set_unreachable();

    let engine = QuorumLockEngine::new(as_stores(&cluster), fast_settings());
    assert_eq!(engine.store_count(), 5);
    assert_eq!(engine.quorum(), 3);

    let ttl = Duration::from_millis(5000);
    let cancel = CancellationToken::new();
    let lease = engine.acquire(&keys(&["inventory"]), ttl, &cancel).await.unwrap();

    // expires_at ~ now + ttl - drift (drift = 5000 * 0.01 + 2 = 52ms)
    let remaining = lease.time_remaining();
    assert!(remaining <= Duration::from_millis(5000 - 52));
    assert!(remaining > Duration::from_millis(4700));

    // the three healthy stores hold the token, the partitioned ones do not
    for store in &cluster[2..] {
        assert_eq!(store.holder("inventory"), Some(lease.value.clone()));
    }
    for store in &cluster[..2] {
        assert_eq!(store.holder("inventory"), None);
    }
}

#[tokio::test]
async fn test_five_stores_three_unreachable_fails_quorum() {
    let cluster = sim_cluster(5);
    for store in &cluster[..3] {
        store.set_unreachable();
    }

    let engine = QuorumLockEngine::new(as_stores(&cluster), fast_settings());
    let cancel = CancellationToken::new();

    let result = engine
        .acquire(&keys(&["inventory"]), Duration::from_secs(5), &cancel)
        .await;

    match result {
        Err(Error::Quorum { granted, needed, attempts }) => {
            assert_eq!(granted, 2);
            assert_eq!(needed, 3);
            assert_eq!(attempts, 3); // first round + retry_count retries
        }
        other => panic!("expected quorum failure, got {other:?}"),
    }

    // no grant may remain claimed after the failed rounds
    for store in &cluster[3..] {
        assert_eq!(store.holder("inventory"), None);
    }
}

#[tokio::test]
async fn test_concurrent_acquirers_exactly_one_wins() {
    let cluster = sim_cluster(3);
    let settings = LockSettings {
        retry_count: 0,
        ..fast_settings()
    };
    let engine_a = QuorumLockEngine::new(as_stores(&cluster), settings.clone());
    let engine_b = QuorumLockEngine::new(as_stores(&cluster), settings);

    let cancel = CancellationToken::new();
    let contended = keys(&["payments"]);
    let (a, b) = tokio::join!(
        engine_a.acquire(&contended, Duration::from_secs(5), &cancel),
        engine_b.acquire(&contended, Duration::from_secs(5), &cancel),
    );

    let winners = usize::from(a.is_ok()) + usize::from(b.is_ok());
    assert_eq!(winners, 1, "exactly one of two contenders must win: {a:?} / {b:?}");

    let lease = a.or(b).unwrap();
    for store in &cluster {
        assert_eq!(store.holder("payments"), Some(lease.value.clone()));
    }
}

#[tokio::test]
async fn test_store_recovery_allows_later_acquisition() {
    let cluster = sim_cluster(5);
    for store in &cluster[..3] {
        store.set_unreachable();
    }
    let engine = QuorumLockEngine::new(as_stores(&cluster), fast_settings());
    let cancel = CancellationToken::new();

    assert!(engine
        .acquire(&keys(&["jobs"]), Duration::from_secs(5), &cancel)
        .await
        .is_err());

    cluster[0].heal();
    assert!(engine
        .acquire(&keys(&["jobs"]), Duration::from_secs(5), &cancel)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_transient_denial_is_retried() {
    let cluster = sim_cluster(3);
    // two stores refuse the first round, grant on retry
    cluster[0].deny_next(1);
    cluster[1].deny_next(1);

    let engine = QuorumLockEngine::new(as_stores(&cluster), fast_settings());
    let cancel = CancellationToken::new();

    let lease = engine
        .acquire(&keys(&["reports"]), Duration::from_secs(5), &cancel)
        .await
        .unwrap();
    for store in &cluster {
        assert_eq!(store.holder("reports"), Some(lease.value.clone()));
    }
}

#[tokio::test]
async fn test_cancellation_observed_during_backoff() {
    let cluster = sim_cluster(3);
    for store in &cluster {
        store.set_unreachable();
    }
    let engine = QuorumLockEngine::new(
        as_stores(&cluster),
        LockSettings {
            retry_count: 10,
            retry_delay: Duration::from_secs(5),
            retry_jitter: Duration::ZERO,
            ..LockSettings::default()
        },
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let result = engine
        .acquire(&keys(&["slow"]), Duration::from_secs(5), &cancel)
        .await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "cancellation must interrupt the backoff delay"
    );
}

#[tokio::test]
async fn test_multi_key_acquisition_is_all_or_nothing_per_store() {
    let cluster = sim_cluster(3);
    let engine = QuorumLockEngine::new(as_stores(&cluster), fast_settings());
    let cancel = CancellationToken::new();

    // pre-claim one of the two keys everywhere
    let first = engine
        .acquire(&keys(&["ledger.a"]), Duration::from_secs(5), &cancel)
        .await
        .unwrap();

    let result = engine
        .acquire(&keys(&["ledger.a", "ledger.b"]), Duration::from_secs(5), &cancel)
        .await;
    assert!(matches!(result, Err(Error::Quorum { granted: 0, .. })));

    // the failed multi-key attempt must not leave ledger.b claimed, nor
    // disturb the holder of ledger.a
    for store in &cluster {
        assert_eq!(store.holder("ledger.b"), None);
        assert_eq!(store.holder("ledger.a"), Some(first.value.clone()));
    }
}

#[tokio::test]
async fn test_expired_lease_is_reclaimable_by_next_caller() {
    let cluster = sim_cluster(3);
    let engine = QuorumLockEngine::new(as_stores(&cluster), fast_settings());
    let cancel = CancellationToken::new();

    let lease = engine
        .acquire(&keys(&["ephemeral"]), Duration::from_millis(120), &cancel)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(lease.is_expired());

    // natural TTL expiry at the stores is the safety net, no release needed
    let next = engine
        .acquire(&keys(&["ephemeral"]), Duration::from_secs(5), &cancel)
        .await
        .unwrap();
    assert_ne!(next.value, lease.value);

    // releasing the dead lease afterwards must not delete the new owner
    engine.release(&lease).await;
    for store in &cluster {
        assert_eq!(store.holder("ephemeral"), Some(next.value.clone()));
    }
}
