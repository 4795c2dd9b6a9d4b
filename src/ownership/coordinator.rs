//! The per-member coordination loop.
//!
//! All mutable ownership state lives in [`OwnershipCoordinator`] and is only
//! touched from its event loop. Inputs arrive as:
//!
//! ```text
//!   facade ──Command──┐
//!   submit tasks ─────┤
//!   reselect timers ──┤
//!                     ▼
//!   change feed ──► run() ◄── leader status (watch)
//!                     │  ◄── commit retry deadline
//!                     ▼
//!        CommitCoordinator ──spawn──► ReplicatedStore::submit
//!        ListenerRegistry  ──queue──► listener threads
//! ```
//!
//! Store submissions never block the loop: each one runs in its own task and
//! reports back through the inbox as [`Command::CommitResult`].

use super::commit::CommitCoordinator;
use super::listener::{ListenerId, ListenerRegistry, OwnershipListener, SubscriptionKey};
use super::registry::CandidateRegistry;
use super::statistics::OwnershipStatistics;
use super::strategy::{Selection, SelectionContext, StrategySet};
use super::translator::{translate_batch, ChangeEvent};
use crate::config::OwnershipConfig;
use crate::error::StoreError;
use crate::metrics::OwnershipMetrics;
use crate::store::{ChangeBatch, LeaderStatus, Modification, ReplicatedStore, WriteBatch};
use crate::types::{
    CandidateName, Entity, EntityType, OwnershipChange, OwnershipState, TransactionId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// Ownership counts per entity type and candidate.
pub type StatisticsSnapshot = HashMap<EntityType, HashMap<CandidateName, u64>>;

/// Answer to an ownership state query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StateLookup {
    /// Answered from the mirror.
    Mirrored(Option<OwnershipState>),
    /// The mirror has not seen the store yet; read the store directly.
    Cold,
}

/// Messages into the coordination loop.
pub(crate) enum Command {
    RegisterCandidate(Entity),
    UnregisterCandidate(Entity),
    RegisterListener {
        key: SubscriptionKey,
        listener: Arc<dyn OwnershipListener>,
    },
    UnregisterListener {
        key: SubscriptionKey,
        id: ListenerId,
    },
    GetOwnershipState {
        entity: Entity,
        reply: oneshot::Sender<StateLookup>,
    },
    GetStatistics {
        entity_type: Option<EntityType>,
        reply: oneshot::Sender<StatisticsSnapshot>,
    },
    MemberStatus {
        member: CandidateName,
        down: bool,
    },
    CommitResult {
        txn: TransactionId,
        result: Result<(), StoreError>,
    },
    Reselect(Entity),
}

/// Owner of the candidate mirror, owner map, statistics and write queue.
pub(crate) struct OwnershipCoordinator {
    local: CandidateName,
    store: Arc<dyn ReplicatedStore>,
    strategies: StrategySet,
    inbox: mpsc::UnboundedSender<Command>,
    metrics: Arc<OwnershipMetrics>,

    registry: CandidateRegistry,
    owners: HashMap<Entity, CandidateName>,
    statistics: OwnershipStatistics,
    listeners: ListenerRegistry,
    commit: CommitCoordinator,

    status: LeaderStatus,
    down: HashSet<CandidateName>,
    /// When each outstanding election started.
    pending_elections: HashMap<Entity, Instant>,
    scheduled_reselect: HashSet<Entity>,
    /// Owner writes enqueued but not yet observed.
    requested_owner: HashMap<Entity, Option<CandidateName>>,
    /// Whether the first change batch has been seen.
    warm: bool,
}

impl OwnershipCoordinator {
    pub(crate) fn new(
        config: &OwnershipConfig,
        store: Arc<dyn ReplicatedStore>,
        strategies: StrategySet,
        inbox: mpsc::UnboundedSender<Command>,
        metrics: Arc<OwnershipMetrics>,
    ) -> Self {
        Self {
            local: config.local_member.clone(),
            store,
            strategies,
            inbox,
            registry: CandidateRegistry::new(),
            owners: HashMap::new(),
            statistics: OwnershipStatistics::new(),
            listeners: ListenerRegistry::new(Arc::clone(&metrics)),
            commit: CommitCoordinator::new(
                config.local_member.clone(),
                config.max_commit_batch_size,
                config.commit_retry_interval(),
                Arc::clone(&metrics),
            ),
            metrics,
            status: LeaderStatus::NoLeader,
            down: HashSet::new(),
            pending_elections: HashMap::new(),
            scheduled_reselect: HashSet::new(),
            requested_owner: HashMap::new(),
            warm: false,
        }
    }

    /// Run until a shutdown signal arrives or its sender is dropped.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut changes: mpsc::UnboundedReceiver<ChangeBatch>,
        mut leader_status: watch::Receiver<LeaderStatus>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!(member = %self.local, "Ownership coordinator started");

        let initial = leader_status.borrow_and_update().clone();
        self.on_leader_status(initial);

        let mut feed_open = true;
        let mut status_open = true;

        loop {
            let retry_at = self.commit.retry_deadline();

            tokio::select! {
                Some(command) = commands.recv() => {
                    self.handle(command);
                }
                batch = changes.recv(), if feed_open => match batch {
                    Some(batch) => self.on_change_batch(batch),
                    None => {
                        warn!(member = %self.local, "Change feed closed");
                        feed_open = false;
                    }
                },
                changed = leader_status.changed(), if status_open => {
                    if changed.is_err() {
                        warn!(member = %self.local, "Leader status feed closed");
                        status_open = false;
                    } else {
                        let status = leader_status.borrow_and_update().clone();
                        self.on_leader_status(status);
                    }
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    if let Some(batch) = self.commit.on_retry_timer() {
                        self.submit(batch);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(member = %self.local, "Ownership coordinator shutting down");
                    break;
                }
            }
        }

        self.listeners.shutdown();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::RegisterCandidate(entity) => {
                debug!(%entity, member = %self.local, "Registering candidate");
                self.enqueue(Modification::AddCandidate {
                    entity,
                    candidate: self.local.clone(),
                });
            }
            Command::UnregisterCandidate(entity) => {
                debug!(%entity, member = %self.local, "Unregistering candidate");
                self.enqueue(Modification::RemoveCandidate {
                    entity,
                    candidate: self.local.clone(),
                });
            }
            Command::RegisterListener { key, listener } => self.register_listener(key, listener),
            Command::UnregisterListener { key, id } => {
                self.listeners.remove(&key, id);
            }
            Command::GetOwnershipState { entity, reply } => {
                let _ = reply.send(self.lookup(&entity));
            }
            Command::GetStatistics { entity_type, reply } => {
                let snapshot = match entity_type {
                    Some(t) => {
                        let counts = self.statistics.by_entity_type(&t);
                        if counts.is_empty() {
                            HashMap::new()
                        } else {
                            HashMap::from([(t, counts)])
                        }
                    }
                    None => self.statistics.snapshot(),
                };
                let _ = reply.send(snapshot);
            }
            Command::MemberStatus { member, down } => self.on_member_status(member, down),
            Command::CommitResult { txn, result } => self.on_commit_result(txn, result),
            Command::Reselect(entity) => {
                self.scheduled_reselect.remove(&entity);
                debug!(%entity, "Reselect timer fired");
                self.evaluate_owner(&entity);
            }
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn enqueue(&mut self, modification: Modification) {
        if let Some(batch) = self.commit.enqueue(modification) {
            self.submit(batch);
        }
    }

    fn submit(&self, batch: WriteBatch) {
        let store = Arc::clone(&self.store);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let txn = batch.transaction_id.clone();
            debug!(%txn, modifications = batch.modifications.len(), "Submitting write");
            let result = store.submit(batch).await;
            // A closed inbox means the loop is gone and the outcome no longer matters.
            let _ = inbox.send(Command::CommitResult { txn, result });
        });
    }

    fn on_commit_result(&mut self, txn: TransactionId, result: Result<(), StoreError>) {
        match result {
            Ok(()) => {
                // Owner guards stay until the change feed shows the write.
                let Some(outcome) = self.commit.on_ack(&txn) else {
                    return;
                };
                if let Some(batch) = outcome.next {
                    self.submit(batch);
                }
            }
            Err(cause) => self.commit.on_failure(&txn, &cause),
        }
    }

    // =========================================================================
    // Change feed
    // =========================================================================

    fn on_change_batch(&mut self, batch: ChangeBatch) {
        if !self.warm {
            self.warm = true;
            debug!(member = %self.local, changes = batch.changes.len(), "Mirror warm");
        }

        for event in translate_batch(&mut self.registry, &batch) {
            match event {
                ChangeEvent::CandidateAdded {
                    entity, candidate, ..
                } => {
                    debug!(%entity, %candidate, "Candidate added");
                    self.evaluate_owner(&entity);
                }
                ChangeEvent::CandidateRemoved {
                    entity, candidate, ..
                } => {
                    debug!(%entity, %candidate, "Candidate removed");
                    self.evaluate_owner(&entity);
                }
                ChangeEvent::OwnerChanged { entity, old, new } => {
                    self.on_owner_changed(entity, old, new);
                }
            }
        }
    }

    fn on_owner_changed(
        &mut self,
        entity: Entity,
        old: Option<CandidateName>,
        new: Option<CandidateName>,
    ) {
        match &new {
            Some(owner) => {
                self.owners.insert(entity.clone(), owner.clone());
                self.pending_elections.remove(&entity);
            }
            None => {
                self.owners.remove(&entity);
            }
        }
        self.statistics
            .apply(&entity.entity_type, old.as_ref(), new.as_ref());
        self.requested_owner.remove(&entity);

        let change = OwnershipChange::between(
            entity.clone(),
            old.as_ref(),
            new.as_ref(),
            &self.local,
            self.in_jeopardy(),
        );
        info!(
            %entity,
            old = ?old,
            new = ?new,
            is_owner = change.is_owner,
            "Ownership changed"
        );
        self.metrics.transitions.inc(entity.entity_type.as_str());
        self.listeners.notify(&change);

        self.evaluate_owner(&entity);
    }

    // =========================================================================
    // Elections
    // =========================================================================

    fn viable_candidates(&self, entity: &Entity) -> Vec<CandidateName> {
        self.registry
            .candidates(entity)
            .iter()
            .filter(|c| !self.down.contains(*c))
            .cloned()
            .collect()
    }

    /// Elect a new owner for `entity` if it needs one. Leader only.
    fn evaluate_owner(&mut self, entity: &Entity) {
        if !self.status.is_leader() {
            return;
        }

        let current = self.owners.get(entity).cloned();
        let candidates = self.viable_candidates(entity);

        if let Some(owner) = &current {
            if candidates.contains(owner) {
                self.pending_elections.remove(entity);
                return;
            }
        }

        if candidates.is_empty() {
            self.pending_elections.remove(entity);
            if current.is_some() {
                debug!(%entity, "No viable candidates, clearing owner");
                self.write_owner(entity, None);
            }
            return;
        }

        let started = *self
            .pending_elections
            .entry(entity.clone())
            .or_insert_with(Instant::now);
        let strategy = self.strategies.for_type(&entity.entity_type);
        let selection = strategy.select(&SelectionContext {
            entity,
            candidates: &candidates,
            previous_owner: current.as_ref(),
            waited: started.elapsed(),
            statistics: &self.statistics,
        });

        match selection {
            Selection::Elected(candidate) => {
                let candidate = if candidates.contains(&candidate) {
                    candidate
                } else {
                    warn!(
                        %entity,
                        %candidate,
                        strategy = strategy.name(),
                        "Strategy elected a non-viable candidate, using the first viable one"
                    );
                    candidates[0].clone()
                };
                debug!(%entity, owner = %candidate, strategy = strategy.name(), "Elected owner");
                self.write_owner(entity, Some(candidate));
            }
            Selection::Defer(delay) => {
                debug!(%entity, ?delay, strategy = strategy.name(), "Election deferred");
                self.schedule_reselect(entity, delay);
            }
        }
    }

    fn write_owner(&mut self, entity: &Entity, owner: Option<CandidateName>) {
        if self.requested_owner.get(entity) == Some(&owner) {
            debug!(%entity, ?owner, "Owner write already pending");
            return;
        }
        self.requested_owner.insert(entity.clone(), owner.clone());
        self.metrics.owner_writes.inc();
        self.enqueue(Modification::SetOwner {
            entity: entity.clone(),
            owner,
        });
    }

    fn schedule_reselect(&mut self, entity: &Entity, delay: Duration) {
        if !self.scheduled_reselect.insert(entity.clone()) {
            return;
        }
        let inbox = self.inbox.clone();
        let entity = entity.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = inbox.send(Command::Reselect(entity));
        });
    }

    fn evaluate_all(&mut self) {
        let mut entities: Vec<Entity> = self.registry.entities().cloned().collect();
        entities.extend(
            self.owners
                .keys()
                .filter(|e| !self.registry.has_candidates(e))
                .cloned(),
        );
        for entity in entities {
            self.evaluate_owner(&entity);
        }
    }

    // =========================================================================
    // Cluster state
    // =========================================================================

    fn in_jeopardy(&self) -> bool {
        self.status == LeaderStatus::IsolatedLeader
    }

    fn on_leader_status(&mut self, status: LeaderStatus) {
        let was_leader = self.status.is_leader();
        let was_jeopardy = self.in_jeopardy();
        self.status = status.clone();

        if let Some(batch) = self.commit.on_leader_status(&status) {
            self.submit(batch);
        }

        let is_leader = status.is_leader();
        if is_leader && !was_leader {
            info!(member = %self.local, "Became ownership leader");
            self.requested_owner.clear();
            self.evaluate_all();
        } else if was_leader && !is_leader {
            info!(member = %self.local, ?status, "Lost ownership leadership");
            self.pending_elections.clear();
            self.requested_owner.clear();
        }

        let jeopardy = self.in_jeopardy();
        if jeopardy != was_jeopardy {
            info!(member = %self.local, in_jeopardy = jeopardy, "Jeopardy changed");
            for (entity, owner) in &self.owners {
                let change = OwnershipChange::between(
                    entity.clone(),
                    Some(owner),
                    Some(owner),
                    &self.local,
                    jeopardy,
                );
                self.listeners.notify(&change);
            }
        }
    }

    fn on_member_status(&mut self, member: CandidateName, down: bool) {
        let changed = if down {
            self.down.insert(member.clone())
        } else {
            self.down.remove(&member)
        };
        if !changed {
            return;
        }
        info!(%member, down, "Member availability changed");

        let affected: Vec<Entity> = self
            .registry
            .entities()
            .filter(|e| self.registry.candidates(e).contains(&member))
            .chain(
                self.owners
                    .iter()
                    .filter(|(_, owner)| **owner == member)
                    .map(|(e, _)| e),
            )
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for entity in affected {
            self.evaluate_owner(&entity);
        }
    }

    // =========================================================================
    // Queries and listeners
    // =========================================================================

    fn lookup(&self, entity: &Entity) -> StateLookup {
        if !self.warm {
            return StateLookup::Cold;
        }
        if !self.registry.has_candidates(entity) {
            return StateLookup::Mirrored(None);
        }
        StateLookup::Mirrored(Some(OwnershipState::from_owner(
            self.owners.get(entity),
            &self.local,
        )))
    }

    fn register_listener(&mut self, key: SubscriptionKey, listener: Arc<dyn OwnershipListener>) {
        let id = ListenerId::of(&listener);
        if !self.listeners.add(key.clone(), listener) {
            return;
        }

        let jeopardy = self.in_jeopardy();
        for (entity, owner) in self.owners.iter().filter(|(e, _)| key.matches(e)) {
            let change =
                OwnershipChange::between(entity.clone(), None, Some(owner), &self.local, jeopardy);
            self.listeners.notify_listener(id, &change);
        }
    }
}
