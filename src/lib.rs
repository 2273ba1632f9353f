//! Quorum-leased advisory mutual exclusion.
//!
//! Independent processes acquire time-bounded leases on named resource keys
//! backed by a quorum of independent lock stores. Lock safety is
//! probabilistic under clock drift, not linearizable: the crate provides
//! advisory exclusion for application-level critical sections, with graceful
//! degradation when quorum cannot be reached.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod keys;
pub mod lease;
pub mod settings;
pub mod store;

pub mod test_utils;

pub use engine::QuorumLockEngine;
pub use error::{Error, Result};
pub use guard::{FallbackPolicy, GuardedCall};
pub use hooks::{HookEvent, HookSet};
pub use keys::{CallIdentity, KeyFn, KeySpec};
pub use lease::{Lease, DEFAULT_LEASE_TTL};
pub use settings::{LockSettings, SettingsOverride};
pub use store::{InMemoryStore, LeaseStore};
