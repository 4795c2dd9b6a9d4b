//! Metrics for monitoring the ownership pipeline.
//!
//! Counters and gauges are plain atomics, named Prometheus-style so they can
//! be exported by whatever exposition layer the embedding process uses:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    OwnershipMetrics                      │
//! │  ┌─────────────────────┐   ┌──────────────────────────┐  │
//! │  │  Counters           │   │  Gauges                  │  │
//! │  │ - commits / retries │   │ - pending writes         │  │
//! │  │ - owner writes      │   │ - listener channels      │  │
//! │  │ - transitions       │   │                          │  │
//! │  │ - notifications     │   │                          │  │
//! │  └─────────────────────┘   └──────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod counters;
mod gauges;

pub use counters::{Counter, LabeledCounter};
pub use gauges::Gauge;

/// Metrics recorded by the coordination loop and the listener workers.
#[derive(Debug)]
pub struct OwnershipMetrics {
    /// Writes submitted to the replicated store, retries included.
    pub commits_submitted: Counter,
    /// Writes acknowledged by the replicated store.
    pub commits_acked: Counter,
    /// Retries that reused the transaction id (write known not applied).
    pub retries_same_txn: Counter,
    /// Retries under a regenerated transaction id (outcome ambiguous).
    pub retries_new_txn: Counter,
    /// Owner writes enqueued by elections.
    pub owner_writes: Counter,
    /// Ownership transitions emitted, by entity type.
    pub transitions: LabeledCounter,
    /// Notifications handed to listeners.
    pub notifications_delivered: Counter,
    /// Listener callbacks that panicked.
    pub listener_failures: Counter,
    /// Modifications waiting behind the in-flight write.
    pub pending_writes: Gauge,
    /// Live listener delivery channels.
    pub listener_channels: Gauge,
}

impl OwnershipMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self {
            commits_submitted: Counter::new(
                "eos_commits_submitted_total",
                "Writes submitted to the replicated store",
            ),
            commits_acked: Counter::new("eos_commits_acked_total", "Writes acknowledged"),
            retries_same_txn: Counter::new(
                "eos_commit_retries_same_txn_total",
                "Retries reusing the transaction id",
            ),
            retries_new_txn: Counter::new(
                "eos_commit_retries_new_txn_total",
                "Retries under a regenerated transaction id",
            ),
            owner_writes: Counter::new("eos_owner_writes_total", "Owner writes enqueued"),
            transitions: LabeledCounter::new(
                "eos_transitions_total",
                "Ownership transitions emitted",
                "entity_type",
            ),
            notifications_delivered: Counter::new(
                "eos_notifications_delivered_total",
                "Notifications handed to listeners",
            ),
            listener_failures: Counter::new(
                "eos_listener_failures_total",
                "Listener callbacks that panicked",
            ),
            pending_writes: Gauge::new("eos_pending_writes", "Queued modifications"),
            listener_channels: Gauge::new("eos_listener_channels", "Live delivery channels"),
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commits_submitted: self.commits_submitted.get(),
            commits_acked: self.commits_acked.get(),
            retries_same_txn: self.retries_same_txn.get(),
            retries_new_txn: self.retries_new_txn.get(),
            owner_writes: self.owner_writes.get(),
            transitions: self.transitions.get_all().iter().map(|(_, n)| n).sum(),
            notifications_delivered: self.notifications_delivered.get(),
            listener_failures: self.listener_failures.get(),
            pending_writes: self.pending_writes.get(),
            listener_channels: self.listener_channels.get(),
        }
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        for counter in [
            &self.commits_submitted,
            &self.commits_acked,
            &self.retries_same_txn,
            &self.retries_new_txn,
            &self.owner_writes,
            &self.notifications_delivered,
            &self.listener_failures,
        ] {
            output.push_str(&format!(
                "# HELP {0} {1}\n# TYPE {0} counter\n{0} {2}\n",
                counter.name(),
                counter.help(),
                counter.get()
            ));
        }

        output.push_str(&format!(
            "# HELP {0} {1}\n# TYPE {0} counter\n",
            self.transitions.name(),
            self.transitions.help()
        ));
        for (label, value) in self.transitions.get_all() {
            output.push_str(&format!(
                "{}{{{}=\"{}\"}} {}\n",
                self.transitions.name(),
                self.transitions.label(),
                label,
                value
            ));
        }

        for gauge in [&self.pending_writes, &self.listener_channels] {
            output.push_str(&format!(
                "# HELP {0} {1}\n# TYPE {0} gauge\n{0} {2}\n",
                gauge.name(),
                gauge.help(),
                gauge.get()
            ));
        }

        output
    }
}

impl Default for OwnershipMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of [`OwnershipMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub commits_submitted: u64,
    pub commits_acked: u64,
    pub retries_same_txn: u64,
    pub retries_new_txn: u64,
    pub owner_writes: u64,
    pub transitions: u64,
    pub notifications_delivered: u64,
    pub listener_failures: u64,
    pub pending_writes: i64,
    pub listener_channels: i64,
}
