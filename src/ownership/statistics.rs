//! Per-candidate ownership counts.

use crate::types::{CandidateName, EntityType};
use std::collections::HashMap;
use tracing::debug;

/// Counts of entities owned per candidate, grouped by entity type.
///
/// Maintained only from owner transitions, never from a full scan.
#[derive(Debug, Clone, Default)]
pub struct OwnershipStatistics {
    counts: HashMap<EntityType, HashMap<CandidateName, u64>>,
}

impl OwnershipStatistics {
    /// Create empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an owner transition for an entity of `entity_type`.
    ///
    /// The decrement and increment happen in one call so readers never see
    /// one without the other.
    pub fn apply(
        &mut self,
        entity_type: &EntityType,
        old: Option<&CandidateName>,
        new: Option<&CandidateName>,
    ) {
        if old == new {
            return;
        }

        if let Some(old) = old {
            self.decrement(entity_type, old);
        }
        if let Some(new) = new {
            *self
                .counts
                .entry(entity_type.clone())
                .or_default()
                .entry(new.clone())
                .or_insert(0) += 1;
        }
    }

    fn decrement(&mut self, entity_type: &EntityType, candidate: &CandidateName) {
        let Some(per_type) = self.counts.get_mut(entity_type) else {
            debug!(%entity_type, %candidate, "Owner decrement with no recorded ownership");
            return;
        };
        match per_type.get_mut(candidate) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                per_type.remove(candidate);
            }
            None => {
                debug!(%entity_type, %candidate, "Owner decrement with no recorded ownership");
            }
        }
        if per_type.is_empty() {
            self.counts.remove(entity_type);
        }
    }

    /// Entities of `entity_type` owned by `candidate`.
    pub fn count(&self, entity_type: &EntityType, candidate: &CandidateName) -> u64 {
        self.counts
            .get(entity_type)
            .and_then(|m| m.get(candidate))
            .copied()
            .unwrap_or(0)
    }

    /// Copy of the counts for one entity type.
    pub fn by_entity_type(&self, entity_type: &EntityType) -> HashMap<CandidateName, u64> {
        self.counts.get(entity_type).cloned().unwrap_or_default()
    }

    /// Entities of `entity_type` that have an owner.
    pub fn owned_entities(&self, entity_type: &EntityType) -> u64 {
        self.counts
            .get(entity_type)
            .map(|m| m.values().sum())
            .unwrap_or(0)
    }

    /// Copy of all counts.
    pub fn snapshot(&self) -> HashMap<EntityType, HashMap<CandidateName, u64>> {
        self.counts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_moves_count() {
        let mut stats = OwnershipStatistics::new();
        let svc = EntityType::new("svc");
        let a = CandidateName::new("A");
        let b = CandidateName::new("B");

        stats.apply(&svc, None, Some(&a));
        stats.apply(&svc, None, Some(&a));
        assert_eq!(stats.count(&svc, &a), 2);

        stats.apply(&svc, Some(&a), Some(&b));
        assert_eq!(stats.count(&svc, &a), 1);
        assert_eq!(stats.count(&svc, &b), 1);
        assert_eq!(stats.owned_entities(&svc), 2);

        stats.apply(&svc, Some(&b), None);
        assert_eq!(stats.count(&svc, &b), 0);
        assert!(!stats.by_entity_type(&svc).contains_key(&b));
    }

    #[test]
    fn test_never_negative() {
        let mut stats = OwnershipStatistics::new();
        let svc = EntityType::new("svc");
        let a = CandidateName::new("A");

        stats.apply(&svc, Some(&a), None);
        assert_eq!(stats.count(&svc, &a), 0);
        assert!(stats.snapshot().is_empty());
    }

    #[test]
    fn test_types_are_independent() {
        let mut stats = OwnershipStatistics::new();
        let a = CandidateName::new("A");

        stats.apply(&EntityType::new("svc"), None, Some(&a));
        stats.apply(&EntityType::new("lock"), None, Some(&a));
        stats.apply(&EntityType::new("lock"), Some(&a), None);

        assert_eq!(stats.count(&EntityType::new("svc"), &a), 1);
        assert_eq!(stats.count(&EntityType::new("lock"), &a), 0);
        assert_eq!(stats.snapshot().len(), 1);
    }
}
