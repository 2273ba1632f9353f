// Resource key resolution

use std::fmt;
use std::sync::Arc;

/// Key-deriving function: maps the call's arguments to sub-keys.
pub type KeyFn = Arc<dyn Fn(&[String]) -> Vec<String> + Send + Sync>;

/// Identity of the call site a guarded operation belongs to: owning
/// component plus member name. Derived sub-keys are namespaced under it so
/// unrelated call sites sharing a sub-key name cannot collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallIdentity {
    pub owner: String,
    pub member: String,
}

impl CallIdentity {
    pub fn new(owner: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            member: member.into(),
        }
    }
}

impl fmt::Display for CallIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.member)
    }
}

/// How a guarded call names the resources it must hold.
#[derive(Clone)]
pub enum KeySpec {
    /// A single fully-qualified key.
    Static(String),
    /// Fully-qualified keys, used verbatim.
    List(Vec<String>),
    /// Sub-keys computed from the call arguments, namespaced under the call
    /// identity.
    Derive(KeyFn),
}

impl KeySpec {
    pub fn derive<F>(f: F) -> Self
    where
        F: Fn(&[String]) -> Vec<String> + Send + Sync + 'static,
    {
        Self::Derive(Arc::new(f))
    }

    /// Produce the final ordered, deduplicated key set for one invocation.
    ///
    /// The sort into canonical order is the sole deadlock-avoidance
    /// mechanism: two calls contending on overlapping key sets always
    /// attempt acquisition in the same order.
    pub fn resolve(&self, identity: &CallIdentity, args: &[String]) -> Vec<String> {
        let mut keys = match self {
            Self::Static(key) => vec![key.clone()],
            Self::List(keys) => keys.clone(),
            Self::Derive(derive) => derive(args)
                .into_iter()
                .map(|sub| format!("{identity}.{sub}"))
                .collect(),
        };
        keys.sort();
        keys.dedup();
        keys
    }
}

impl fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(key) => f.debug_tuple("Static").field(key).finish(),
            Self::List(keys) => f.debug_tuple("List").field(keys).finish(),
            Self::Derive(_) => f.write_str("Derive(..)"),
        }
    }
}
