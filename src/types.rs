//! Core types used throughout entity ownership.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Namespace for a category of contended resources, e.g. `service-group`.
    EntityType
);

string_id!(
    /// Identifier of an entity, unique within its type.
    EntityId
);

string_id!(
    /// Identity of a cluster member competing for ownership.
    CandidateName
);

/// A contended resource. Structural equality; used as a map key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    /// The entity type.
    pub entity_type: EntityType,
    /// The entity id within its type.
    pub id: EntityId,
}

impl Entity {
    /// Create a new entity.
    pub fn new(entity_type: impl Into<EntityType>, id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.id)
    }
}

/// Ownership state of an entity as seen by the local member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipState {
    /// The local member is the owner.
    pub is_owner: bool,
    /// Some member is the owner.
    pub has_owner: bool,
}

impl OwnershipState {
    /// Compute the state for an owner value from the local member's perspective.
    pub fn from_owner(owner: Option<&CandidateName>, local: &CandidateName) -> Self {
        Self {
            is_owner: owner == Some(local),
            has_owner: owner.is_some(),
        }
    }
}

/// An ownership transition delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipChange {
    /// The entity whose ownership changed.
    pub entity: Entity,
    /// The local member owned the entity before.
    pub was_owner: bool,
    /// The local member owns the entity now.
    pub is_owner: bool,
    /// Some member owns the entity now.
    pub has_owner: bool,
    /// Cluster health is degraded; the ownership view may be unreliable.
    pub in_jeopardy: bool,
}

impl OwnershipChange {
    /// Build the transition between two owner values as seen by `local`.
    pub fn between(
        entity: Entity,
        old: Option<&CandidateName>,
        new: Option<&CandidateName>,
        local: &CandidateName,
        in_jeopardy: bool,
    ) -> Self {
        Self {
            entity,
            was_owner: old == Some(local),
            is_owner: new == Some(local),
            has_owner: new.is_some(),
            in_jeopardy,
        }
    }

    /// Current state carried by this transition.
    pub fn state(&self) -> OwnershipState {
        OwnershipState {
            is_owner: self.is_owner,
            has_owner: self.has_owner,
        }
    }
}

/// Identifier attached to every write submitted to the replicated store.
///
/// Scoped to the submitting member; the sequence only grows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    /// The member that generated the id.
    pub member: CandidateName,
    /// Per-member sequence number.
    pub seq: u64,
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-txn-{}", self.member, self.seq)
    }
}
