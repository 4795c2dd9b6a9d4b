//! Error types for entity ownership.

use crate::types::Entity;
use thiserror::Error;

/// Result type alias for entity ownership operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for entity ownership.
#[derive(Error, Debug)]
pub enum Error {
    /// The local member already registered a candidate for this entity.
    #[error("candidate already registered for entity {0}")]
    CandidateAlreadyRegistered(Entity),

    /// Replicated store errors.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// No selection strategy is registered under this name.
    #[error("unknown owner selection strategy: {0}")]
    UnknownStrategy(String),

    /// The coordination loop has stopped.
    #[error("ownership service stopped")]
    ServiceStopped,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Failures reported by the replicated store for a submitted write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No leader is currently known; the write was not applied.
    #[error("no shard leader")]
    NoLeader,

    /// The local replica is a leader cut off from its followers. The write may
    /// sit in its log and be replicated once the partition heals.
    #[error("shard leader is isolated")]
    IsolatedLeader,

    /// The write was rejected. It may have been partially applied.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The store could not be reached. The write may have been applied.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this failure proves the write never reached a leader.
    ///
    /// Only this failure may be retried under the same transaction id.
    pub fn is_no_leader(&self) -> bool {
        matches!(self, StoreError::NoLeader)
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_leader_classification() {
        assert!(StoreError::NoLeader.is_no_leader());
        assert!(!StoreError::IsolatedLeader.is_no_leader());
        assert!(!StoreError::Rejected("conflict".into()).is_no_leader());
        assert!(!StoreError::Unavailable("timeout".into()).is_no_leader());
    }

    #[test]
    fn test_display() {
        let err = Error::CandidateAlreadyRegistered(Entity::new("svc", "x"));
        assert_eq!(err.to_string(), "candidate already registered for entity svc/x");

        let err: Error = StoreError::NoLeader.into();
        assert_eq!(err.to_string(), "store error: no shard leader");
    }
}
