//! Paths into the replicated ownership tree.
//!
//! ```text
//! entity-owners
//! └── entity-type[<type>]
//!     └── entity[<id>]
//!         ├── candidate[<name>]   value: <name>
//!         └── owner               value: <name> | "" | absent
//! ```

use crate::types::{CandidateName, Entity, EntityId, EntityType};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ENTITY_OWNERS: &str = "entity-owners";
pub const ENTITY_TYPE: &str = "entity-type";
pub const ENTITY: &str = "entity";
pub const CANDIDATE: &str = "candidate";
pub const OWNER: &str = "owner";

/// One component of a tree path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathArg {
    /// A plain container or leaf.
    Node(String),
    /// A list entry identified by its key value.
    Key { node: String, value: String },
}

impl PathArg {
    fn node(name: &str) -> Self {
        PathArg::Node(name.to_string())
    }

    fn key(node: &str, value: &str) -> Self {
        PathArg::Key {
            node: node.to_string(),
            value: value.to_string(),
        }
    }

    fn key_value(&self, expected: &str) -> Option<&str> {
        match self {
            PathArg::Key { node, value } if node == expected => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for PathArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathArg::Node(name) => f.write_str(name),
            PathArg::Key { node, value } => write!(f, "{node}[{value}]"),
        }
    }
}

/// Absolute path of a node in the replicated tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorePath(Vec<PathArg>);

impl StorePath {
    /// Root of the ownership tree.
    pub fn root() -> Self {
        StorePath(vec![PathArg::node(ENTITY_OWNERS)])
    }

    /// Path of an entity's list entry.
    pub fn entity(entity: &Entity) -> Self {
        StorePath(vec![
            PathArg::node(ENTITY_OWNERS),
            PathArg::key(ENTITY_TYPE, entity.entity_type.as_str()),
            PathArg::key(ENTITY, entity.id.as_str()),
        ])
    }

    /// Path of a candidate entry.
    pub fn candidate(entity: &Entity, candidate: &CandidateName) -> Self {
        Self::entity(entity).child(PathArg::key(CANDIDATE, candidate.as_str()))
    }

    /// Path of the owner leaf.
    pub fn owner(entity: &Entity) -> Self {
        Self::entity(entity).child(PathArg::node(OWNER))
    }

    fn child(mut self, arg: PathArg) -> Self {
        self.0.push(arg);
        self
    }

    /// Path components.
    pub fn args(&self) -> &[PathArg] {
        &self.0
    }

    /// Whether `self` is `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &StorePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Extract the entity by truncating the path at the entity key.
    pub fn to_entity(&self) -> Option<Entity> {
        let mut entity_type = None;
        for arg in &self.0 {
            if let Some(value) = arg.key_value(ENTITY_TYPE) {
                entity_type = Some(value);
            } else if let Some(id) = arg.key_value(ENTITY) {
                return entity_type.map(|t| Entity {
                    entity_type: EntityType::new(t),
                    id: EntityId::new(id),
                });
            }
        }
        None
    }

    /// Candidate name when this is a candidate entry path.
    pub fn to_candidate(&self) -> Option<CandidateName> {
        self.0
            .last()
            .and_then(|arg| arg.key_value(CANDIDATE))
            .map(CandidateName::new)
    }

    /// Whether this is an owner leaf path.
    pub fn is_owner_leaf(&self) -> bool {
        matches!(self.0.last(), Some(PathArg::Node(name)) if name == OWNER)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for arg in &self.0 {
            write!(f, "/{arg}")?;
        }
        Ok(())
    }
}
