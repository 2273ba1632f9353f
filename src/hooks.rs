// Lifecycle hooks for guarded calls

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Payload handed to every lifecycle hook.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub keys: Vec<String>,
    pub ttl: Duration,
    /// Time since the guarded call started. Zero for `pre_acquire`.
    pub elapsed: Duration,
}

pub type Hook = Arc<dyn Fn(&HookEvent) + Send + Sync>;

/// Optional process-wide lifecycle callbacks.
///
/// Hooks are side-effect-only. A panicking hook is logged and swallowed; it
/// never aborts the protected operation or prevents lease cleanup.
#[derive(Clone, Default)]
pub struct HookSet {
    pub pre_acquire: Option<Hook>,
    pub on_acquired: Option<Hook>,
    pub on_released: Option<Hook>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pre_acquire<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HookEvent) + Send + Sync + 'static,
    {
        self.pre_acquire = Some(Arc::new(hook));
        self
    }

    pub fn with_on_acquired<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HookEvent) + Send + Sync + 'static,
    {
        self.on_acquired = Some(Arc::new(hook));
        self
    }

    pub fn with_on_released<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HookEvent) + Send + Sync + 'static,
    {
        self.on_released = Some(Arc::new(hook));
        self
    }

    pub(crate) fn fire_pre_acquire(&self, event: &HookEvent) {
        fire(self.pre_acquire.as_ref(), "pre_acquire", event);
    }

    pub(crate) fn fire_on_acquired(&self, event: &HookEvent) {
        fire(self.on_acquired.as_ref(), "on_acquired", event);
    }

    pub(crate) fn fire_on_released(&self, event: &HookEvent) {
        fire(self.on_released.as_ref(), "on_released", event);
    }
}

fn fire(hook: Option<&Hook>, stage: &str, event: &HookEvent) {
    if let Some(hook) = hook {
        if catch_unwind(AssertUnwindSafe(|| hook(event))).is_err() {
            error!(stage, keys = ?event.keys, "lifecycle hook panicked");
        }
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("pre_acquire", &self.pre_acquire.is_some())
            .field("on_acquired", &self.on_acquired.is_some())
            .field("on_released", &self.on_released.is_some())
            .finish()
    }
}
