//! Pluggable owner selection.
//!
//! A strategy sees the viable candidates of one entity (registration order),
//! the previous owner and how long the election has been pending, and either
//! elects a candidate or asks to be asked again later. Strategies are looked
//! up by name from [`StrategyConfig`] when the service starts.

use super::statistics::OwnershipStatistics;
use crate::config::{StrategyConfig, StrategySpec};
use crate::error::{Error, Result};
use crate::types::{CandidateName, Entity, EntityType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one selection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Make this candidate the owner.
    Elected(CandidateName),
    /// Re-invoke the strategy after this delay.
    Defer(Duration),
}

/// Input to a selection attempt.
#[derive(Debug)]
pub struct SelectionContext<'a> {
    /// The entity being elected.
    pub entity: &'a Entity,
    /// Viable candidates in registration order. Never empty.
    pub candidates: &'a [CandidateName],
    /// Owner before the election; may no longer be a candidate.
    pub previous_owner: Option<&'a CandidateName>,
    /// How long this election has been pending.
    pub waited: Duration,
    /// Current ownership counts.
    pub statistics: &'a OwnershipStatistics,
}

impl SelectionContext<'_> {
    fn previous_if_viable(&self) -> Option<&CandidateName> {
        self.previous_owner.filter(|p| self.candidates.contains(p))
    }

    fn remaining(&self, delay: Duration) -> Option<Duration> {
        delay.checked_sub(self.waited).filter(|d| !d.is_zero())
    }
}

/// Policy deciding which candidate owns an entity.
pub trait OwnerSelectionStrategy: Send + Sync + fmt::Debug + 'static {
    /// Registered name.
    fn name(&self) -> &'static str;

    /// Elect an owner or defer.
    fn select(&self, ctx: &SelectionContext<'_>) -> Selection;
}

/// Elects the first registered candidate, keeping a viable previous owner.
#[derive(Debug, Clone)]
pub struct FirstCandidate {
    settle_delay: Duration,
}

impl FirstCandidate {
    pub const NAME: &'static str = "first-candidate";

    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }
}

impl OwnerSelectionStrategy for FirstCandidate {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn select(&self, ctx: &SelectionContext<'_>) -> Selection {
        if let Some(remaining) = ctx.remaining(self.settle_delay) {
            return Selection::Defer(remaining);
        }
        let owner = ctx.previous_if_viable().unwrap_or(&ctx.candidates[0]);
        Selection::Elected(owner.clone())
    }
}

/// Elects the candidate owning the fewest entities of the same type.
///
/// Ties go to the earliest registered candidate.
#[derive(Debug, Clone)]
pub struct LeastLoaded {
    settle_delay: Duration,
}

impl LeastLoaded {
    pub const NAME: &'static str = "least-loaded";

    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }
}

impl OwnerSelectionStrategy for LeastLoaded {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn select(&self, ctx: &SelectionContext<'_>) -> Selection {
        if let Some(remaining) = ctx.remaining(self.settle_delay) {
            return Selection::Defer(remaining);
        }
        let entity_type = &ctx.entity.entity_type;
        let owner = ctx
            .candidates
            .iter()
            .min_by_key(|c| ctx.statistics.count(entity_type, c))
            .unwrap_or(&ctx.candidates[0]);
        Selection::Elected(owner.clone())
    }
}

/// Keeps the previous owner, giving it the settle delay to come back
/// before electing the first registered candidate.
#[derive(Debug, Clone)]
pub struct PreferPrevious {
    settle_delay: Duration,
}

impl PreferPrevious {
    pub const NAME: &'static str = "prefer-previous";

    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }
}

impl OwnerSelectionStrategy for PreferPrevious {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn select(&self, ctx: &SelectionContext<'_>) -> Selection {
        if let Some(previous) = ctx.previous_if_viable() {
            return Selection::Elected(previous.clone());
        }
        if ctx.previous_owner.is_some() {
            if let Some(remaining) = ctx.remaining(self.settle_delay) {
                return Selection::Defer(remaining);
            }
        }
        Selection::Elected(ctx.candidates[0].clone())
    }
}

/// Constructor for a named strategy, given its settle delay.
pub type StrategyFactory = fn(Duration) -> Arc<dyn OwnerSelectionStrategy>;

/// Named strategy constructors.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    /// Registry with no strategies.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in strategies.
    pub fn builtin() -> Self {
        Self::empty()
            .with(FirstCandidate::NAME, |d| -> Arc<dyn OwnerSelectionStrategy> {
                Arc::new(FirstCandidate::new(d))
            })
            .with(LeastLoaded::NAME, |d| -> Arc<dyn OwnerSelectionStrategy> {
                Arc::new(LeastLoaded::new(d))
            })
            .with(PreferPrevious::NAME, |d| -> Arc<dyn OwnerSelectionStrategy> {
                Arc::new(PreferPrevious::new(d))
            })
    }

    /// Register a strategy under `name`, replacing any previous one.
    pub fn with(mut self, name: impl Into<String>, factory: StrategyFactory) -> Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Build the strategy described by `spec`.
    pub fn create(&self, spec: &StrategySpec) -> Result<Arc<dyn OwnerSelectionStrategy>> {
        self.factories
            .get(&spec.name)
            .map(|factory| factory(spec.settle_delay))
            .ok_or_else(|| Error::UnknownStrategy(spec.name.clone()))
    }

    /// Whether a strategy is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Strategies resolved per entity type.
#[derive(Debug)]
pub struct StrategySet {
    default: Arc<dyn OwnerSelectionStrategy>,
    per_type: HashMap<EntityType, Arc<dyn OwnerSelectionStrategy>>,
}

impl StrategySet {
    /// Resolve every configured strategy. Unknown names fail here, at startup.
    pub fn resolve(registry: &StrategyRegistry, config: &StrategyConfig) -> Result<Self> {
        let default = registry.create(config.default_spec())?;
        let per_type = config
            .configured_types()
            .map(|(entity_type, spec)| Ok((entity_type.clone(), registry.create(spec)?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { default, per_type })
    }

    /// Strategy for an entity type.
    pub fn for_type(&self, entity_type: &EntityType) -> Arc<dyn OwnerSelectionStrategy> {
        self.per_type
            .get(entity_type)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}
