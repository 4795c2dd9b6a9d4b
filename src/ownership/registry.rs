//! Local mirror of the candidate sets in the replicated store.

use crate::types::{CandidateName, Entity};
use std::collections::HashMap;

/// Per-entity candidate lists, rebuilt incrementally from the change feed.
///
/// Registration order is preserved. Entities whose list becomes empty are
/// dropped.
#[derive(Debug, Default)]
pub struct CandidateRegistry {
    candidates: HashMap<Entity, Vec<CandidateName>>,
}

impl CandidateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate. Returns `false` if it was already present.
    pub fn add(&mut self, entity: &Entity, candidate: CandidateName) -> bool {
        let list = self.candidates.entry(entity.clone()).or_default();
        if list.contains(&candidate) {
            return false;
        }
        list.push(candidate);
        true
    }

    /// Remove a candidate. Returns `false` if it was not present.
    pub fn remove(&mut self, entity: &Entity, candidate: &CandidateName) -> bool {
        let Some(list) = self.candidates.get_mut(entity) else {
            return false;
        };
        let Some(pos) = list.iter().position(|c| c == candidate) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.candidates.remove(entity);
        }
        true
    }

    /// Candidates of an entity in registration order.
    pub fn candidates(&self, entity: &Entity) -> &[CandidateName] {
        self.candidates
            .get(entity)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether the entity has at least one candidate.
    pub fn has_candidates(&self, entity: &Entity) -> bool {
        self.candidates.contains_key(entity)
    }

    /// All entities with candidates.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.candidates.keys()
    }

    /// Number of entities with candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether no entity has candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
