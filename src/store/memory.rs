//! In-process replicated store.
//!
//! A single tree shared by every member handle, with explicit control over
//! leadership, isolation and write failures. Writes are journaled by
//! transaction id: a batch whose id was already applied is acknowledged
//! without being applied again, the same guarantee a consensus log gives for
//! a retried proposal.

use super::{
    ChangeBatch, EntityRecord, LeaderStatus, Modification, ModificationKind, ReplicatedStore,
    StorePath, TreeChange, WriteBatch,
};
use crate::error::StoreError;
use crate::types::{CandidateName, Entity, TransactionId};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// A write failure queued by a test.
#[derive(Debug, Clone)]
struct InjectedFailure {
    cause: StoreError,
    apply_first: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Path -> (insertion sequence, value).
    tree: BTreeMap<StorePath, (u64, String)>,
    next_seq: u64,
    /// Encoded batches in commit order.
    journal: Vec<Bytes>,
    applied: HashSet<TransactionId>,
    /// Every submission attempt, including rejected ones.
    submitted: Vec<TransactionId>,
    subscribers: Vec<(StorePath, mpsc::UnboundedSender<ChangeBatch>)>,
    leader: Option<CandidateName>,
    isolated: HashSet<CandidateName>,
    statuses: HashMap<CandidateName, watch::Sender<LeaderStatus>>,
    failures: VecDeque<InjectedFailure>,
}

impl StoreState {
    fn status_of(&self, member: &CandidateName) -> LeaderStatus {
        let is_leader = self.leader.as_ref() == Some(member);
        if self.isolated.contains(member) {
            return if is_leader {
                LeaderStatus::IsolatedLeader
            } else {
                LeaderStatus::NoLeader
            };
        }
        match &self.leader {
            Some(_) if is_leader => LeaderStatus::Leader,
            Some(leader) if self.isolated.contains(leader) => LeaderStatus::NoLeader,
            Some(leader) => LeaderStatus::Follower {
                leader: leader.clone(),
            },
            None => LeaderStatus::NoLeader,
        }
    }

    fn publish_statuses(&self) {
        for (member, sender) in &self.statuses {
            let status = self.status_of(member);
            sender.send_if_modified(|current| {
                if *current == status {
                    false
                } else {
                    *current = status;
                    true
                }
            });
        }
    }

    fn put(&mut self, path: StorePath, value: String) -> Option<String> {
        let seq = match self.tree.get(&path) {
            Some((seq, _)) => *seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.tree.insert(path, (seq, value)).map(|(_, v)| v)
    }

    fn apply(&mut self, modification: &Modification) -> Option<TreeChange> {
        match modification {
            Modification::AddCandidate { entity, candidate } => {
                let path = StorePath::candidate(entity, candidate);
                if self.tree.contains_key(&path) {
                    return None;
                }
                self.put(path.clone(), candidate.to_string());
                Some(TreeChange {
                    path,
                    kind: ModificationKind::Write,
                    before: None,
                    after: Some(candidate.to_string()),
                })
            }
            Modification::RemoveCandidate { entity, candidate } => {
                let path = StorePath::candidate(entity, candidate);
                let (_, before) = self.tree.remove(&path)?;
                Some(TreeChange {
                    path,
                    kind: ModificationKind::Delete,
                    before: Some(before),
                    after: None,
                })
            }
            Modification::SetOwner {
                entity,
                owner: Some(owner),
            } => {
                let path = StorePath::owner(entity);
                let before = self.put(path.clone(), owner.to_string());
                Some(TreeChange {
                    path,
                    kind: ModificationKind::Write,
                    before,
                    after: Some(owner.to_string()),
                })
            }
            Modification::SetOwner {
                entity,
                owner: None,
            } => {
                let path = StorePath::owner(entity);
                let (_, before) = self.tree.remove(&path)?;
                Some(TreeChange {
                    path,
                    kind: ModificationKind::Delete,
                    before: Some(before),
                    after: None,
                })
            }
        }
    }

    fn commit(&mut self, batch: &WriteBatch) -> Result<(), StoreError> {
        let encoded = batch
            .to_bytes()
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        self.journal.push(Bytes::from(encoded));
        self.applied.insert(batch.transaction_id.clone());

        let changes: Vec<TreeChange> = batch
            .modifications
            .iter()
            .filter_map(|m| self.apply(m))
            .collect();

        debug!(
            txn = %batch.transaction_id,
            modifications = batch.modifications.len(),
            changes = changes.len(),
            "Committed write batch"
        );

        if !changes.is_empty() {
            self.dispatch(changes);
        }
        Ok(())
    }

    fn dispatch(&mut self, changes: Vec<TreeChange>) {
        self.subscribers.retain(|(prefix, tx)| {
            let relevant: Vec<TreeChange> = changes
                .iter()
                .filter(|c| c.path.starts_with(prefix))
                .cloned()
                .collect();
            if relevant.is_empty() {
                return !tx.is_closed();
            }
            tx.send(ChangeBatch { changes: relevant }).is_ok()
        });
    }

    fn sorted_under(&self, prefix: &StorePath) -> Vec<(&StorePath, &String)> {
        let mut entries: Vec<_> = self
            .tree
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, (seq, value))| (*seq, path, value))
            .collect();
        entries.sort_by_key(|(seq, _, _)| *seq);
        entries.into_iter().map(|(_, p, v)| (p, v)).collect()
    }
}

/// Shared in-process store. Cloning yields another reference to the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Create an empty store with no leader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handle through which `member` talks to the store.
    pub fn member(&self, member: impl Into<CandidateName>) -> MemoryStoreHandle {
        let member = member.into();
        let mut state = self.state.lock();
        let status = state.status_of(&member);
        state
            .statuses
            .entry(member.clone())
            .or_insert_with(|| watch::channel(status).0);
        MemoryStoreHandle {
            member,
            store: self.clone(),
        }
    }

    /// Make `member` the leader.
    pub fn elect(&self, member: impl Into<CandidateName>) {
        let mut state = self.state.lock();
        state.leader = Some(member.into());
        state.publish_statuses();
    }

    /// Forget the current leader.
    pub fn clear_leader(&self) {
        let mut state = self.state.lock();
        state.leader = None;
        state.publish_statuses();
    }

    /// Cut `member` off from the rest of the cluster.
    pub fn isolate(&self, member: impl Into<CandidateName>) {
        let mut state = self.state.lock();
        state.isolated.insert(member.into());
        state.publish_statuses();
    }

    /// Reconnect an isolated member.
    pub fn heal(&self, member: impl Into<CandidateName>) {
        let mut state = self.state.lock();
        state.isolated.remove(&member.into());
        state.publish_statuses();
    }

    /// Fail the next submitted write with `cause` without applying it.
    pub fn fail_next(&self, cause: StoreError) {
        self.state.lock().failures.push_back(InjectedFailure {
            cause,
            apply_first: false,
        });
    }

    /// Apply the next submitted write, then report `cause` anyway.
    pub fn fail_after_apply(&self, cause: StoreError) {
        self.state.lock().failures.push_back(InjectedFailure {
            cause,
            apply_first: true,
        });
    }

    /// Current value at `path`.
    pub fn value(&self, path: &StorePath) -> Option<String> {
        self.state.lock().tree.get(path).map(|(_, v)| v.clone())
    }

    /// Current owner of `entity`.
    pub fn owner(&self, entity: &Entity) -> Option<CandidateName> {
        self.value(&StorePath::owner(entity))
            .filter(|v| !v.is_empty())
            .map(CandidateName::new)
    }

    /// Candidates of `entity` in registration order.
    pub fn candidates(&self, entity: &Entity) -> Vec<CandidateName> {
        self.record(entity).map(|r| r.candidates).unwrap_or_default()
    }

    /// Every submission attempt in order, including failed ones.
    pub fn submitted_transactions(&self) -> Vec<TransactionId> {
        self.state.lock().submitted.clone()
    }

    /// Number of batches applied to the tree.
    pub fn journal_len(&self) -> usize {
        self.state.lock().journal.len()
    }

    /// Decode the journaled batch at `index`.
    pub fn journal_entry(&self, index: usize) -> Option<WriteBatch> {
        let state = self.state.lock();
        state
            .journal
            .get(index)
            .and_then(|bytes| WriteBatch::from_bytes(bytes).ok())
    }

    fn record(&self, entity: &Entity) -> Option<EntityRecord> {
        let state = self.state.lock();
        let entries = state.sorted_under(&StorePath::entity(entity));
        if entries.is_empty() {
            return None;
        }

        let mut record = EntityRecord::default();
        for (path, value) in entries {
            if let Some(candidate) = path.to_candidate() {
                record.candidates.push(candidate);
            } else if path.is_owner_leaf() && !value.is_empty() {
                record.owner = Some(CandidateName::new(value.as_str()));
            }
        }
        Some(record)
    }
}

/// One member's connection to a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreHandle {
    member: CandidateName,
    store: MemoryStore,
}

impl MemoryStoreHandle {
    /// The member this handle belongs to.
    pub fn member(&self) -> &CandidateName {
        &self.member
    }

    /// The shared store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl ReplicatedStore for MemoryStoreHandle {
    async fn submit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        tokio::task::yield_now().await;

        let mut state = self.store.state.lock();
        state.submitted.push(batch.transaction_id.clone());

        match state.status_of(&self.member) {
            LeaderStatus::NoLeader => return Err(StoreError::NoLeader),
            LeaderStatus::IsolatedLeader => return Err(StoreError::IsolatedLeader),
            LeaderStatus::Leader | LeaderStatus::Follower { .. } => {}
        }

        if let Some(failure) = state.failures.pop_front() {
            if failure.apply_first && !state.applied.contains(&batch.transaction_id) {
                state.commit(&batch)?;
            }
            return Err(failure.cause);
        }

        if state.applied.contains(&batch.transaction_id) {
            debug!(txn = %batch.transaction_id, "Duplicate transaction acknowledged");
            return Ok(());
        }

        state.commit(&batch)
    }

    fn subscribe(&self, prefix: StorePath) -> mpsc::UnboundedReceiver<ChangeBatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.store.state.lock();

        let replay = ChangeBatch {
            changes: state
                .sorted_under(&prefix)
                .into_iter()
                .map(|(path, value)| TreeChange {
                    path: path.clone(),
                    kind: ModificationKind::Write,
                    before: None,
                    after: Some(value.clone()),
                })
                .collect(),
        };
        // The receiver is still in hand, so this cannot fail.
        let _ = tx.send(replay);

        state.subscribers.push((prefix, tx));
        rx
    }

    fn leader_status(&self) -> watch::Receiver<LeaderStatus> {
        let mut state = self.store.state.lock();
        let status = state.status_of(&self.member);
        state
            .statuses
            .entry(self.member.clone())
            .or_insert_with(|| watch::channel(status).0)
            .subscribe()
    }

    async fn read_entity(&self, entity: &Entity) -> Result<Option<EntityRecord>, StoreError> {
        Ok(self.store.record(entity))
    }
}
