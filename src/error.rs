use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("quorum not reached: {granted} of {needed} stores granted after {attempts} attempt(s)")]
    Quorum {
        granted: usize,
        needed: usize,
        attempts: u32,
    },

    #[error("guarded call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("lock operation cancelled")]
    Cancelled,

    #[error("lease expired before it could be extended")]
    LeaseExpired,

    #[error("store {store:?} unavailable: {reason}")]
    StoreUnavailable { store: String, reason: String },

    #[error("guarded operation failed: {0}")]
    Operation(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an application-level failure raised by a guarded operation.
    pub fn operation<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Operation(err.into())
    }

    pub fn is_quorum(&self) -> bool {
        matches!(self, Self::Quorum { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
