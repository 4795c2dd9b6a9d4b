//! Public entry point for entity ownership.

use super::coordinator::{Command, OwnershipCoordinator, StateLookup, StatisticsSnapshot};
use super::listener::{ListenerId, OwnershipListener, SubscriptionKey};
use super::strategy::{StrategyRegistry, StrategySet};
use crate::config::OwnershipConfig;
use crate::error::{Error, Result};
use crate::metrics::OwnershipMetrics;
use crate::store::{ReplicatedStore, StorePath};
use crate::types::{CandidateName, Entity, EntityType, OwnershipState};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Entity ownership for one cluster member.
///
/// Registers the local member as a candidate for entities, delivers
/// ownership transitions to listeners and answers ownership queries from a
/// local mirror of the replicated store. All state changes are processed by
/// a single background task started by [`EntityOwnershipService::start`].
pub struct EntityOwnershipService {
    local: CandidateName,
    store: Arc<dyn ReplicatedStore>,
    commands: mpsc::UnboundedSender<Command>,
    registered: Arc<Mutex<HashSet<Entity>>>,
    metrics: Arc<OwnershipMetrics>,
    shutdown_tx: mpsc::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EntityOwnershipService {
    /// Start the service with the built-in selection strategies.
    pub async fn start(config: OwnershipConfig, store: Arc<dyn ReplicatedStore>) -> Result<Self> {
        Self::start_with_strategies(config, store, StrategyRegistry::builtin()).await
    }

    /// Start the service, resolving strategy names against `registry`.
    ///
    /// Fails if the configuration is invalid or names an unknown strategy.
    pub async fn start_with_strategies(
        config: OwnershipConfig,
        store: Arc<dyn ReplicatedStore>,
        registry: StrategyRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let strategies = StrategySet::resolve(&registry, &config.strategies)?;
        let metrics = Arc::new(OwnershipMetrics::new());

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let changes = store.subscribe(StorePath::root());
        let leader_status = store.leader_status();

        let coordinator = OwnershipCoordinator::new(
            &config,
            Arc::clone(&store),
            strategies,
            commands_tx.clone(),
            Arc::clone(&metrics),
        );
        let task = tokio::spawn(coordinator.run(commands_rx, changes, leader_status, shutdown_rx));

        info!(
            member = %config.local_member,
            max_batch = config.max_commit_batch_size,
            retry_interval = ?config.commit_retry_interval(),
            "Entity ownership service started"
        );

        Ok(Self {
            local: config.local_member,
            store,
            commands: commands_tx,
            registered: Arc::new(Mutex::new(HashSet::new())),
            metrics,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    // ==================== Candidates ====================

    /// Register the local member as a candidate for `entity`.
    ///
    /// The registration lasts until the returned handle is closed or dropped.
    pub fn register_candidate(&self, entity: Entity) -> Result<CandidateRegistration> {
        let mut registered = self.registered.lock();
        if registered.contains(&entity) {
            return Err(Error::CandidateAlreadyRegistered(entity));
        }
        self.send(Command::RegisterCandidate(entity.clone()))?;
        registered.insert(entity.clone());

        Ok(CandidateRegistration {
            entity,
            commands: self.commands.clone(),
            registered: Arc::clone(&self.registered),
            released: false,
        })
    }

    /// Whether the local member holds a candidate registration for `entity`.
    pub fn is_candidate_registered(&self, entity: &Entity) -> bool {
        self.registered.lock().contains(entity)
    }

    // ==================== Listeners ====================

    /// Subscribe `listener` to every entity of `entity_type`.
    ///
    /// The listener first receives a transition for each entity of the type
    /// that already has an owner.
    pub fn register_listener(
        &self,
        entity_type: impl Into<EntityType>,
        listener: Arc<dyn OwnershipListener>,
    ) -> Result<ListenerRegistration> {
        self.subscribe(SubscriptionKey::Type(entity_type.into()), listener)
    }

    /// Subscribe `listener` to a single entity.
    pub fn register_entity_listener(
        &self,
        entity: Entity,
        listener: Arc<dyn OwnershipListener>,
    ) -> Result<ListenerRegistration> {
        self.subscribe(SubscriptionKey::Entity(entity), listener)
    }

    fn subscribe(
        &self,
        key: SubscriptionKey,
        listener: Arc<dyn OwnershipListener>,
    ) -> Result<ListenerRegistration> {
        let id = ListenerId::of(&listener);
        self.send(Command::RegisterListener {
            key: key.clone(),
            listener,
        })?;
        Ok(ListenerRegistration {
            key,
            id,
            commands: self.commands.clone(),
            released: false,
        })
    }

    // ==================== Queries ====================

    /// Ownership state of `entity` as seen by the local member.
    ///
    /// Returns `None` if the entity has no candidates. Until the local mirror
    /// has seen the store, the store is read directly.
    pub async fn get_ownership_state(&self, entity: &Entity) -> Result<Option<OwnershipState>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetOwnershipState {
            entity: entity.clone(),
            reply,
        })?;

        match rx.await.map_err(|_| Error::ServiceStopped)? {
            StateLookup::Mirrored(state) => Ok(state),
            StateLookup::Cold => {
                debug!(%entity, "Mirror cold, reading store");
                let record = self.store.read_entity(entity).await?;
                Ok(record
                    .filter(|r| !r.candidates.is_empty())
                    .map(|r| OwnershipState::from_owner(r.owner.as_ref(), &self.local)))
            }
        }
    }

    /// Owned-entity counts for every entity type and candidate.
    pub async fn ownership_statistics(&self) -> Result<StatisticsSnapshot> {
        self.statistics(None).await
    }

    /// Owned-entity counts per candidate for one entity type.
    pub async fn ownership_statistics_for(
        &self,
        entity_type: &EntityType,
    ) -> Result<HashMap<CandidateName, u64>> {
        let mut snapshot = self.statistics(Some(entity_type.clone())).await?;
        Ok(snapshot.remove(entity_type).unwrap_or_default())
    }

    async fn statistics(&self, entity_type: Option<EntityType>) -> Result<StatisticsSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetStatistics { entity_type, reply })?;
        rx.await.map_err(|_| Error::ServiceStopped)
    }

    // ==================== Cluster membership ====================

    /// Report that `member` is unreachable. Its candidacies stop being viable.
    pub fn member_down(&self, member: impl Into<CandidateName>) -> Result<()> {
        self.send(Command::MemberStatus {
            member: member.into(),
            down: true,
        })
    }

    /// Report that `member` is reachable again.
    pub fn member_up(&self, member: impl Into<CandidateName>) -> Result<()> {
        self.send(Command::MemberStatus {
            member: member.into(),
            down: false,
        })
    }

    // ==================== Accessors ====================

    /// The local member.
    pub fn local_member(&self) -> &CandidateName {
        &self.local
    }

    /// Shared metrics.
    pub fn metrics(&self) -> Arc<OwnershipMetrics> {
        Arc::clone(&self.metrics)
    }

    // ==================== Lifecycle ====================

    /// Stop the coordination loop and every listener thread.
    pub async fn shutdown(&self) {
        info!(member = %self.local, "Shutting down entity ownership service");
        let _ = self.shutdown_tx.send(()).await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Ownership coordinator task failed");
            }
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::ServiceStopped)
    }
}

impl fmt::Debug for EntityOwnershipService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityOwnershipService")
            .field("local", &self.local)
            .field("registered", &self.registered.lock().len())
            .finish()
    }
}

/// A candidate registration. Unregisters when closed or dropped.
pub struct CandidateRegistration {
    entity: Entity,
    commands: mpsc::UnboundedSender<Command>,
    registered: Arc<Mutex<HashSet<Entity>>>,
    released: bool,
}

impl CandidateRegistration {
    /// The registered entity.
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Unregister the candidate.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        self.registered.lock().remove(&self.entity);
        if self
            .commands
            .send(Command::UnregisterCandidate(self.entity.clone()))
            .is_err()
        {
            debug!(entity = %self.entity, "Service stopped before candidate release");
        }
    }
}

impl Drop for CandidateRegistration {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for CandidateRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateRegistration")
            .field("entity", &self.entity)
            .field("released", &self.released)
            .finish()
    }
}

/// A listener subscription. Unsubscribes when closed or dropped.
pub struct ListenerRegistration {
    key: SubscriptionKey,
    id: ListenerId,
    commands: mpsc::UnboundedSender<Command>,
    released: bool,
}

impl ListenerRegistration {
    /// What the listener is subscribed to.
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Unsubscribe the listener.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let _ = self.commands.send(Command::UnregisterListener {
            key: self.key.clone(),
            id: self.id,
        });
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("key", &self.key)
            .field("listener", &self.id)
            .finish()
    }
}
