//! Simulated lease stores for protocol tests: per-store latency,
//! unreachability (partition), and scripted denial.

use crate::{
    store::{InMemoryStore, LeaseStore},
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct Behavior {
    reachable: bool,
    /// Refuse this many grants (answering `Ok(false)`) before behaving
    /// normally again.
    deny_next: u32,
    latency: Duration,
}

/// An [`InMemoryStore`] wrapped with fault injection.
#[derive(Debug)]
pub struct SimulatedStore {
    name: String,
    inner: InMemoryStore,
    behavior: Mutex<Behavior>,
}

impl SimulatedStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: InMemoryStore::new(),
            behavior: Mutex::new(Behavior {
                reachable: true,
                deny_next: 0,
                latency: Duration::ZERO,
            }),
        }
    }

    pub fn set_unreachable(&self) {
        self.behavior.lock().reachable = false;
    }

    pub fn heal(&self) {
        self.behavior.lock().reachable = true;
    }

    pub fn deny_next(&self, grants: u32) {
        self.behavior.lock().deny_next = grants;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.behavior.lock().latency = latency;
    }

    /// Current live owner token for a key, if any.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.inner.holder(key)
    }

    /// Simulate the network leg, then decide whether this call is scripted
    /// to fail. `Ok(true)` means proceed to the real store.
    async fn leg(&self) -> Result<bool> {
        let (reachable, denied, latency) = {
            let mut behavior = self.behavior.lock();
            let denied = behavior.deny_next > 0;
            if denied {
                behavior.deny_next -= 1;
            }
            (behavior.reachable, denied, behavior.latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !reachable {
            return Err(Error::StoreUnavailable {
                store: self.name.clone(),
                reason: "unreachable".to_string(),
            });
        }
        Ok(!denied)
    }
}

#[async_trait]
impl LeaseStore for SimulatedStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        if !self.leg().await? {
            return Ok(false);
        }
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn set_if_owner(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        if !self.leg().await? {
            return Ok(false);
        }
        self.inner.set_if_owner(key, value, ttl).await
    }

    async fn delete_if_owner(&self, key: &str, value: &str) -> Result<bool> {
        if !self.leg().await? {
            return Ok(false);
        }
        self.inner.delete_if_owner(key, value).await
    }
}

/// A cluster of `n` independent simulated stores named `store-0..n`.
pub fn sim_cluster(n: usize) -> Vec<Arc<SimulatedStore>> {
    (0..n)
        .map(|i| Arc::new(SimulatedStore::new(format!("store-{i}"))))
        .collect()
}

/// Upcast a simulated cluster to the engine's store list.
pub fn as_stores(cluster: &[Arc<SimulatedStore>]) -> Vec<Arc<dyn LeaseStore>> {
    cluster
        .iter()
        .map(|store| Arc::clone(store) as Arc<dyn LeaseStore>)
        .collect()
}
