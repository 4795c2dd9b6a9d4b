//! Contract with the replicated hierarchical store.
//!
//! Ownership state lives in a consensus-backed tree owned by an external
//! store. This layer only needs two things from it:
//!
//! - a write path: submit a [`WriteBatch`] and get an ack or a [`StoreError`]
//! - a change feed: before/after snapshots of changed paths under a prefix
//!
//! plus the local replica's [`LeaderStatus`], which drives the commit retry
//! state machine. [`MemoryStore`] is an in-process implementation.

pub mod memory;
pub mod path;

pub use memory::{MemoryStore, MemoryStoreHandle};
pub use path::{PathArg, StorePath};

use crate::error::StoreError;
use crate::types::{CandidateName, Entity, TransactionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

/// A single change to the ownership tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modification {
    /// Add a candidate entry for an entity.
    AddCandidate {
        entity: Entity,
        candidate: CandidateName,
    },

    /// Remove a candidate entry.
    RemoveCandidate {
        entity: Entity,
        candidate: CandidateName,
    },

    /// Write the owner leaf. `None` clears it.
    SetOwner {
        entity: Entity,
        owner: Option<CandidateName>,
    },
}

impl Modification {
    /// Entity the modification applies to.
    pub fn entity(&self) -> &Entity {
        match self {
            Modification::AddCandidate { entity, .. }
            | Modification::RemoveCandidate { entity, .. }
            | Modification::SetOwner { entity, .. } => entity,
        }
    }
}

/// Modifications submitted together under one transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub transaction_id: TransactionId,
    pub modifications: Vec<Modification>,
}

impl WriteBatch {
    /// Serialize the batch to bytes.
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a batch from bytes.
    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// How a path changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationKind {
    /// Written or appeared.
    Write,
    /// Deleted or disappeared.
    Delete,
}

/// One changed path with its value before and after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeChange {
    pub path: StorePath,
    pub kind: ModificationKind,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Changes delivered by one change-feed callback, in commit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub changes: Vec<TreeChange>,
}

/// The local replica's view of store leadership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderStatus {
    /// The local replica is the leader.
    Leader,
    /// Another replica is the leader.
    Follower { leader: CandidateName },
    /// The local replica is a leader without a quorum.
    IsolatedLeader,
    /// No leader is known.
    NoLeader,
}

impl LeaderStatus {
    /// Whether writes can currently reach a leader.
    pub fn leader_known(&self) -> bool {
        matches!(self, LeaderStatus::Leader | LeaderStatus::Follower { .. })
    }

    /// Whether the local replica is the functioning leader.
    pub fn is_leader(&self) -> bool {
        matches!(self, LeaderStatus::Leader)
    }
}

/// Snapshot of one entity read directly from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRecord {
    /// Candidates in registration order.
    pub candidates: Vec<CandidateName>,
    /// Current owner, if any.
    pub owner: Option<CandidateName>,
}

/// The replicated store as seen from one member.
#[async_trait]
pub trait ReplicatedStore: Send + Sync + 'static {
    /// Submit a write. Resolves when the leader commits or rejects it.
    async fn submit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Subscribe to changes under `prefix`.
    ///
    /// The first batch replays the existing state as writes.
    fn subscribe(&self, prefix: StorePath) -> mpsc::UnboundedReceiver<ChangeBatch>;

    /// Leadership status of the local replica.
    fn leader_status(&self) -> watch::Receiver<LeaderStatus>;

    /// Read one entity directly from the store.
    async fn read_entity(&self, entity: &Entity) -> Result<Option<EntityRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_serialization() {
        let batch = WriteBatch {
            transaction_id: TransactionId {
                member: CandidateName::new("A"),
                seq: 3,
            },
            modifications: vec![
                Modification::AddCandidate {
                    entity: Entity::new("svc", "x"),
                    candidate: CandidateName::new("A"),
                },
                Modification::SetOwner {
                    entity: Entity::new("svc", "x"),
                    owner: None,
                },
            ],
        };

        let bytes = batch.to_bytes().unwrap();
        assert_eq!(WriteBatch::from_bytes(&bytes).unwrap(), batch);
    }

    #[test]
    fn test_truncated_batch_is_serialization_error() {
        let result = WriteBatch::from_bytes(&[0xff]);
        assert!(matches!(result, Err(crate::error::Error::Serialization(_))));
    }

    #[test]
    fn test_leader_status() {
        assert!(LeaderStatus::Leader.leader_known());
        assert!(LeaderStatus::Leader.is_leader());
        let follower = LeaderStatus::Follower {
            leader: CandidateName::new("B"),
        };
        assert!(follower.leader_known());
        assert!(!follower.is_leader());
        assert!(!LeaderStatus::IsolatedLeader.leader_known());
        assert!(!LeaderStatus::NoLeader.leader_known());
    }
}
