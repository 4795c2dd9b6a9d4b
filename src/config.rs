//! Configuration types for entity ownership.

use crate::error::{Error, Result};
use crate::types::{CandidateName, EntityType};
use std::collections::HashMap;
use std::time::Duration;

/// Property prefix for per-type strategy settings.
const ENTITY_TYPE_PREFIX: &str = "entity.type.";

/// Main configuration for the entity ownership service.
#[derive(Debug, Clone)]
pub struct OwnershipConfig {
    /// Identity of the local member.
    pub local_member: CandidateName,

    /// Maximum number of modifications submitted in one write.
    pub max_commit_batch_size: usize,

    /// Leader election timeout of the replicated store.
    /// Failed writes are retried after this interval.
    pub leader_election_timeout: Duration,

    /// Owner selection strategy per entity type.
    pub strategies: StrategyConfig,
}

impl Default for OwnershipConfig {
    fn default() -> Self {
        Self {
            local_member: CandidateName::new("member-1"),
            max_commit_batch_size: 20,
            leader_election_timeout: Duration::from_secs(10),
            strategies: StrategyConfig::default(),
        }
    }
}

impl OwnershipConfig {
    /// Create a new configuration for the given local member.
    pub fn new(local_member: impl Into<CandidateName>) -> Self {
        Self {
            local_member: local_member.into(),
            ..Default::default()
        }
    }

    /// Set the maximum commit batch size.
    pub fn with_max_commit_batch_size(mut self, size: usize) -> Self {
        self.max_commit_batch_size = size;
        self
    }

    /// Set the store's leader election timeout.
    pub fn with_leader_election_timeout(mut self, timeout: Duration) -> Self {
        self.leader_election_timeout = timeout;
        self
    }

    /// Set the strategy configuration.
    pub fn with_strategies(mut self, strategies: StrategyConfig) -> Self {
        self.strategies = strategies;
        self
    }

    /// Interval between retries of a failed write.
    pub fn commit_retry_interval(&self) -> Duration {
        self.leader_election_timeout
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.local_member.as_str().is_empty() {
            return Err(Error::Config("local member name must not be empty".into()));
        }
        if self.max_commit_batch_size == 0 {
            return Err(Error::Config("max_commit_batch_size must be > 0".into()));
        }
        if self.leader_election_timeout.is_zero() {
            return Err(Error::Config("leader_election_timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// Strategy name plus the settle delay it waits before electing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategySpec {
    /// Registered strategy name.
    pub name: String,
    /// Time an election stays pending before the strategy commits to a choice.
    pub settle_delay: Duration,
}

impl StrategySpec {
    /// Create a spec with no settle delay.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settle_delay: Duration::ZERO,
        }
    }

    /// Set the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Parse `<name>[,<delay-millis>]`.
    fn parse(value: &str) -> Result<Self> {
        let mut parts = value.splitn(2, ',');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(Error::Config(format!("missing strategy name in {value:?}")));
        }

        let mut spec = Self::new(name);
        if let Some(delay) = parts.next() {
            let millis: u64 = delay.trim().parse().map_err(|_| {
                Error::Config(format!("invalid strategy delay {:?}", delay.trim()))
            })?;
            spec.settle_delay = Duration::from_millis(millis);
        }
        Ok(spec)
    }
}

impl Default for StrategySpec {
    fn default() -> Self {
        Self::new("first-candidate")
    }
}

/// Owner selection strategies keyed by entity type.
#[derive(Debug, Clone, Default)]
pub struct StrategyConfig {
    default: StrategySpec,
    per_type: HashMap<EntityType, StrategySpec>,
}

impl StrategyConfig {
    /// Create a config where every type uses the given default.
    pub fn with_default(default: StrategySpec) -> Self {
        Self {
            default,
            per_type: HashMap::new(),
        }
    }

    /// Assign a strategy to an entity type.
    pub fn with_type(mut self, entity_type: impl Into<EntityType>, spec: StrategySpec) -> Self {
        self.per_type.insert(entity_type.into(), spec);
        self
    }

    /// Parse flat properties of the form `entity.type.<type> = <name>[,<delay-millis>]`.
    ///
    /// Keys without the prefix are ignored.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in properties {
            let Some(entity_type) = key.as_ref().strip_prefix(ENTITY_TYPE_PREFIX) else {
                continue;
            };
            if entity_type.is_empty() {
                return Err(Error::Config(format!("missing entity type in key {:?}", key.as_ref())));
            }
            config
                .per_type
                .insert(EntityType::new(entity_type), StrategySpec::parse(value.as_ref())?);
        }
        Ok(config)
    }

    /// Strategy for an entity type, falling back to the default.
    pub fn spec_for(&self, entity_type: &EntityType) -> &StrategySpec {
        self.per_type.get(entity_type).unwrap_or(&self.default)
    }

    /// The default strategy.
    pub fn default_spec(&self) -> &StrategySpec {
        &self.default
    }

    /// All explicitly configured types.
    pub fn configured_types(&self) -> impl Iterator<Item = (&EntityType, &StrategySpec)> {
        self.per_type.iter()
    }
}
