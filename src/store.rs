use crate::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

/// One independent backing store for lease entries.
///
/// The engine is agnostic to the transport; it only needs the three
/// conditional primitives below. `Ok(false)` means the store refused the
/// operation (entry held by someone else); `Err` means the store could not be
/// reached and is counted as "not granted" for the round.
#[async_trait]
pub trait LeaseStore: Send + Sync + std::fmt::Debug {
    /// `SET key=value IF NOT EXISTS, TTL=ttl`. Grants only when no live entry
    /// exists for the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// `SET key=value, TTL=ttl IF stored value == value`. Used to extend a
    /// held lease without re-creating it.
    async fn set_if_owner(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// `DELETE key IF stored value == value`. Must fail safely (return
    /// `Ok(false)`) when the stored value no longer matches, so a stale
    /// caller can never release another owner's entry.
    async fn delete_if_owner(&self, key: &str, value: &str) -> Result<bool>;
}

#[derive(Debug)]
struct StoreEntry {
    value: String,
    expires_at: Instant,
}

impl StoreEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process lease store. Entries expire lazily: an expired entry is
/// indistinguishable from an absent one.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: dashmap::DashMap<String, StoreEntry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current live owner token for a key, if any.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }
}

#[async_trait]
impl LeaseStore for InMemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let fresh = StoreEntry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn set_if_owner(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() || occupied.get().value != value {
                    Ok(false)
                } else {
                    occupied.insert(StoreEntry {
                        value: value.to_string(),
                        expires_at: Instant::now() + ttl,
                    });
                    Ok(true)
                }
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn delete_if_owner(&self, key: &str, value: &str) -> Result<bool> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                if !occupied.get().is_expired() && occupied.get().value == value {
                    occupied.remove();
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(_) => Ok(false),
        }
    }
}
