//! Translation of tree changes into ownership events.
//!
//! Candidate entries become [`ChangeEvent::CandidateAdded`] /
//! [`ChangeEvent::CandidateRemoved`] carrying the full candidate list after
//! the change; owner leaves become [`ChangeEvent::OwnerChanged`]. Changes are
//! translated strictly in delivery order, so events for one entity keep the
//! order in which the store committed them.

use super::registry::CandidateRegistry;
use crate::store::{ChangeBatch, ModificationKind, TreeChange};
use crate::types::{CandidateName, Entity};
use tracing::{debug, trace};

/// A semantic ownership event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A candidate appeared. `candidates` is the list after the change.
    CandidateAdded {
        entity: Entity,
        candidate: CandidateName,
        candidates: Vec<CandidateName>,
    },

    /// A candidate disappeared. `candidates` is the list after the change.
    CandidateRemoved {
        entity: Entity,
        candidate: CandidateName,
        candidates: Vec<CandidateName>,
    },

    /// The owner leaf changed value.
    OwnerChanged {
        entity: Entity,
        old: Option<CandidateName>,
        new: Option<CandidateName>,
    },
}

/// Translate a whole batch, updating the registry as candidate entries change.
pub fn translate_batch(registry: &mut CandidateRegistry, batch: &ChangeBatch) -> Vec<ChangeEvent> {
    batch
        .changes
        .iter()
        .filter_map(|change| {
            if change.path.is_owner_leaf() {
                translate_owner(change)
            } else if change.path.to_candidate().is_some() {
                translate_candidate(registry, change)
            } else {
                trace!(path = %change.path, "Ignoring change outside candidate and owner nodes");
                None
            }
        })
        .collect()
}

/// Translate a change to a candidate entry.
pub fn translate_candidate(
    registry: &mut CandidateRegistry,
    change: &TreeChange,
) -> Option<ChangeEvent> {
    let entity = change.path.to_entity()?;
    let candidate = change.path.to_candidate()?;

    let appeared = change.kind == ModificationKind::Write
        && change.before.is_none()
        && change.after.is_some();
    let disappeared = change.before.is_some() && change.after.is_none();

    if appeared {
        if !registry.add(&entity, candidate.clone()) {
            debug!(%entity, %candidate, "Candidate already mirrored");
            return None;
        }
        Some(ChangeEvent::CandidateAdded {
            candidates: registry.candidates(&entity).to_vec(),
            entity,
            candidate,
        })
    } else if disappeared {
        if !registry.remove(&entity, &candidate) {
            // The mirror can lag a cold start.
            debug!(%entity, %candidate, "Removal of unmirrored candidate");
            return None;
        }
        Some(ChangeEvent::CandidateRemoved {
            candidates: registry.candidates(&entity).to_vec(),
            entity,
            candidate,
        })
    } else {
        None
    }
}

/// Translate a change to an owner leaf. Returns `None` when the owner is unchanged.
pub fn translate_owner(change: &TreeChange) -> Option<ChangeEvent> {
    let entity = change.path.to_entity()?;
    let old = owner_value(change.before.as_deref());
    let new = owner_value(change.after.as_deref());

    if old == new {
        return None;
    }
    Some(ChangeEvent::OwnerChanged { entity, old, new })
}

fn owner_value(value: Option<&str>) -> Option<CandidateName> {
    value.filter(|v| !v.is_empty()).map(CandidateName::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StorePath;

    fn entity() -> Entity {
        Entity::new("svc", "x")
    }

    fn candidate_write(name: &str) -> TreeChange {
        TreeChange {
            path: StorePath::candidate(&entity(), &CandidateName::new(name)),
            kind: ModificationKind::Write,
            before: None,
            after: Some(name.to_string()),
        }
    }

    fn candidate_delete(name: &str) -> TreeChange {
        TreeChange {
            path: StorePath::candidate(&entity(), &CandidateName::new(name)),
            kind: ModificationKind::Delete,
            before: Some(name.to_string()),
            after: None,
        }
    }

    fn owner_write(before: Option<&str>, after: Option<&str>) -> TreeChange {
        TreeChange {
            path: StorePath::owner(&entity()),
            kind: if after.is_some() {
                ModificationKind::Write
            } else {
                ModificationKind::Delete
            },
            before: before.map(str::to_string),
            after: after.map(str::to_string),
        }
    }

    #[test]
    fn test_added_carries_full_set() {
        let mut registry = CandidateRegistry::new();
        let batch = ChangeBatch {
            changes: vec![candidate_write("A"), candidate_write("B")],
        };

        let events = translate_batch(&mut registry, &batch);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            ChangeEvent::CandidateAdded {
                entity: entity(),
                candidate: CandidateName::new("B"),
                candidates: vec![CandidateName::new("A"), CandidateName::new("B")],
            }
        );
    }

    #[test]
    fn test_removed_carries_remaining_set() {
        let mut registry = CandidateRegistry::new();
        translate_batch(
            &mut registry,
            &ChangeBatch {
                changes: vec![candidate_write("A"), candidate_write("B")],
            },
        );

        let event = translate_candidate(&mut registry, &candidate_delete("A")).unwrap();
        assert_eq!(
            event,
            ChangeEvent::CandidateRemoved {
                entity: entity(),
                candidate: CandidateName::new("A"),
                candidates: vec![CandidateName::new("B")],
            }
        );
    }

    #[test]
    fn test_removal_without_mirror_is_noop() {
        let mut registry = CandidateRegistry::new();
        assert_eq!(translate_candidate(&mut registry, &candidate_delete("A")), None);
    }

    #[test]
    fn test_owner_noop_dropped() {
        assert_eq!(translate_owner(&owner_write(Some("A"), Some("A"))), None);
        assert_eq!(translate_owner(&owner_write(None, None)), None);
        assert_eq!(translate_owner(&owner_write(Some(""), None)), None);
    }

    #[test]
    fn test_owner_change() {
        assert_eq!(
            translate_owner(&owner_write(None, Some("A"))),
            Some(ChangeEvent::OwnerChanged {
                entity: entity(),
                old: None,
                new: Some(CandidateName::new("A")),
            })
        );
        assert_eq!(
            translate_owner(&owner_write(Some("A"), Some(""))),
            Some(ChangeEvent::OwnerChanged {
                entity: entity(),
                old: Some(CandidateName::new("A")),
                new: None,
            })
        );
    }

    #[test]
    fn test_batch_preserves_delivery_order() {
        let mut registry = CandidateRegistry::new();
        let batch = ChangeBatch {
            changes: vec![
                candidate_write("A"),
                owner_write(None, Some("A")),
                candidate_delete("A"),
                owner_write(Some("A"), None),
            ],
        };

        let events = translate_batch(&mut registry, &batch);
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ChangeEvent::CandidateAdded { .. }));
        assert!(matches!(events[1], ChangeEvent::OwnerChanged { .. }));
        assert!(matches!(events[2], ChangeEvent::CandidateRemoved { .. }));
        assert!(matches!(
            &events[3],
            ChangeEvent::OwnerChanged { new: None, .. }
        ));
        assert!(registry.is_empty());
    }
}
