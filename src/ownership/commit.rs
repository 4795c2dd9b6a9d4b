//! Serialized writes to the replicated store.
//!
//! The commit coordinator keeps at most one write in flight. Everything else
//! waits in a FIFO queue and is drained in batches when the in-flight write
//! is acknowledged. Retries follow one rule:
//!
//! - the store reported that no leader was reachable: the write was not
//!   applied, so it is retried under the same transaction id;
//! - anything else (rejection, timeout, an isolated leader, leadership lost
//!   while the write was outstanding): the write may already be journaled, so it is retried under
//!   a fresh transaction id.
//!
//! The coordinator does no I/O. Callers submit the batches it hands back and
//! report the outcome; the retry timer is exposed as a deadline.

use crate::error::StoreError;
use crate::metrics::OwnershipMetrics;
use crate::store::{LeaderStatus, Modification, WriteBatch};
use crate::types::{CandidateName, TransactionId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlightState {
    /// Submitted, outcome pending.
    Submitted,
    /// Failed for lack of a leader; resubmit as-is once one is known.
    AwaitingLeader,
    /// Outcome ambiguous; already re-identified, resubmit on the retry timer.
    AwaitingRetry,
}

#[derive(Debug)]
struct InFlightCommit {
    batch: WriteBatch,
    state: InFlightState,
}

/// Result of an acknowledged write.
#[derive(Debug, Default)]
pub struct AckOutcome {
    /// Modifications the store committed.
    pub committed: Vec<Modification>,
    /// Next batch to submit, if any.
    pub next: Option<WriteBatch>,
}

/// Single-writer queue in front of the replicated store.
#[derive(Debug)]
pub struct CommitCoordinator {
    member: CandidateName,
    next_seq: u64,
    max_batch_size: usize,
    retry_interval: Duration,
    pending: VecDeque<Modification>,
    in_flight: Option<InFlightCommit>,
    retry_at: Option<Instant>,
    status: LeaderStatus,
    metrics: Arc<OwnershipMetrics>,
}

impl CommitCoordinator {
    /// Create a coordinator for `member`.
    pub fn new(
        member: CandidateName,
        max_batch_size: usize,
        retry_interval: Duration,
        metrics: Arc<OwnershipMetrics>,
    ) -> Self {
        Self {
            member,
            next_seq: 1,
            max_batch_size: max_batch_size.max(1),
            retry_interval,
            pending: VecDeque::new(),
            in_flight: None,
            retry_at: None,
            status: LeaderStatus::NoLeader,
            metrics,
        }
    }

    /// Queue a modification. Returns a batch to submit when the writer is idle
    /// and a leader is known.
    pub fn enqueue(&mut self, modification: Modification) -> Option<WriteBatch> {
        self.pending.push_back(modification);
        self.metrics.pending_writes.inc();
        self.start_next()
    }

    /// The in-flight write `txn` was committed.
    pub fn on_ack(&mut self, txn: &TransactionId) -> Option<AckOutcome> {
        if !self.is_current(txn) {
            debug!(%txn, "Ignoring ack for superseded transaction");
            return None;
        }

        let committed = self.in_flight.take().map(|c| c.batch.modifications)?;
        self.retry_at = None;
        self.metrics.commits_acked.inc();
        debug!(%txn, modifications = committed.len(), "Write committed");

        Some(AckOutcome {
            committed,
            next: self.start_next(),
        })
    }

    /// The in-flight write `txn` failed with `cause`.
    pub fn on_failure(&mut self, txn: &TransactionId, cause: &StoreError) {
        if !self.is_current(txn) {
            debug!(%txn, %cause, "Ignoring failure for superseded transaction");
            return;
        }
        let retry_interval = self.retry_interval;
        let Some(in_flight) = self.in_flight.as_mut() else {
            return;
        };
        if in_flight.state != InFlightState::Submitted {
            return;
        }

        if cause.is_no_leader() {
            warn!(%txn, %cause, "Write not applied, retrying under the same transaction");
            in_flight.state = InFlightState::AwaitingLeader;
        } else {
            warn!(%txn, %cause, "Write outcome ambiguous, retrying under a new transaction");
            self.reidentify();
        }
        self.retry_at = Some(Instant::now() + retry_interval);
    }

    /// The local replica's leadership status changed.
    pub fn on_leader_status(&mut self, status: &LeaderStatus) -> Option<WriteBatch> {
        let previous = std::mem::replace(&mut self.status, status.clone());
        if previous == *status {
            return None;
        }

        // The leader we submitted to is gone; it may or may not have
        // replicated the write before stepping down.
        let leader_lost = previous.leader_known();
        if leader_lost && self.in_flight_state() == Some(InFlightState::Submitted) {
            info!(?previous, ?status, "Leader changed with a write in flight");
            self.reidentify();
            self.retry_at = Some(Instant::now() + self.retry_interval);
        }

        if !status.leader_known() {
            return None;
        }
        match self.in_flight_state() {
            Some(InFlightState::AwaitingLeader) | Some(InFlightState::AwaitingRetry) => {
                self.resubmit()
            }
            Some(InFlightState::Submitted) => None,
            None => self.start_next(),
        }
    }

    /// The retry deadline passed.
    pub fn on_retry_timer(&mut self) -> Option<WriteBatch> {
        self.retry_at = None;
        if !self.status.leader_known() {
            // Resumed by the next leader change.
            return None;
        }
        match self.in_flight_state() {
            Some(InFlightState::AwaitingLeader) | Some(InFlightState::AwaitingRetry) => {
                self.resubmit()
            }
            _ => None,
        }
    }

    /// When the retry timer fires, if armed.
    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Whether a write is outstanding.
    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Transaction id of the outstanding write.
    pub fn in_flight_transaction(&self) -> Option<&TransactionId> {
        self.in_flight.as_ref().map(|c| &c.batch.transaction_id)
    }

    /// Modifications waiting behind the in-flight write.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn in_flight_state(&self) -> Option<InFlightState> {
        self.in_flight.as_ref().map(|c| c.state)
    }

    fn is_current(&self, txn: &TransactionId) -> bool {
        self.in_flight_transaction() == Some(txn)
    }

    fn next_transaction_id(&mut self) -> TransactionId {
        let txn = TransactionId {
            member: self.member.clone(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        txn
    }

    fn reidentify(&mut self) {
        let txn = self.next_transaction_id();
        if let Some(in_flight) = self.in_flight.as_mut() {
            debug!(old = %in_flight.batch.transaction_id, new = %txn, "Regenerated transaction id");
            in_flight.batch.transaction_id = txn;
            in_flight.state = InFlightState::AwaitingRetry;
        }
    }

    fn resubmit(&mut self) -> Option<WriteBatch> {
        let in_flight = self.in_flight.as_mut()?;
        match in_flight.state {
            InFlightState::AwaitingLeader => self.metrics.retries_same_txn.inc(),
            InFlightState::AwaitingRetry => self.metrics.retries_new_txn.inc(),
            InFlightState::Submitted => return None,
        }
        in_flight.state = InFlightState::Submitted;
        self.retry_at = None;
        self.metrics.commits_submitted.inc();
        Some(in_flight.batch.clone())
    }

    fn start_next(&mut self) -> Option<WriteBatch> {
        if self.in_flight.is_some() || self.pending.is_empty() || !self.status.leader_known() {
            return None;
        }

        let take = self.pending.len().min(self.max_batch_size);
        let modifications: Vec<Modification> = self.pending.drain(..take).collect();
        self.metrics.pending_writes.set(self.pending.len() as i64);

        let batch = WriteBatch {
            transaction_id: self.next_transaction_id(),
            modifications,
        };
        self.in_flight = Some(InFlightCommit {
            batch: batch.clone(),
            state: InFlightState::Submitted,
        });
        self.metrics.commits_submitted.inc();
        Some(batch)
    }
}
