//! Testing utilities for entity ownership.
//!
//! This module provides:
//! - [`TestCluster`]: several services sharing one [`MemoryStore`]
//! - [`RecordingListener`] and [`PanickingListener`]
//! - polling helpers for eventually-consistent assertions
//!
//! # Example
//!
//! ```rust,ignore
//! use regent::testing::{RecordingListener, TestCluster};
//!
//! let cluster = TestCluster::start(&["A", "B"], "A").await;
//! let listener = RecordingListener::new();
//! let _reg = cluster.service("B").register_listener("svc", listener.clone())?;
//! ```

mod listener_tests;
mod ownership_integration_tests;

use crate::config::OwnershipConfig;
use crate::ownership::{EntityOwnershipService, OwnershipListener};
use crate::store::MemoryStore;
use crate::types::{Entity, OwnershipChange, OwnershipState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Election timeout used by test clusters; also the commit retry interval.
pub const TEST_ELECTION_TIMEOUT: Duration = Duration::from_millis(50);

/// Default time to wait for a condition to become true.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Several services sharing one in-process store.
pub struct TestCluster {
    /// The shared store.
    pub store: MemoryStore,
    services: Vec<EntityOwnershipService>,
}

impl TestCluster {
    /// Start one service per member, with `leader` as the store leader.
    pub async fn start(members: &[&str], leader: &str) -> Self {
        Self::start_with(members, leader, |config| config).await
    }

    /// Like [`TestCluster::start`], adjusting each member's config.
    pub async fn start_with<F>(members: &[&str], leader: &str, configure: F) -> Self
    where
        F: Fn(OwnershipConfig) -> OwnershipConfig,
    {
        let store = MemoryStore::new();
        store.elect(leader);

        let mut services = Vec::with_capacity(members.len());
        for &member in members {
            let config = configure(
                OwnershipConfig::new(member).with_leader_election_timeout(TEST_ELECTION_TIMEOUT),
            );
            let service = EntityOwnershipService::start(config, Arc::new(store.member(member)))
                .await
                .expect("service should start");
            services.push(service);
        }

        Self { store, services }
    }

    /// The service of `member`.
    pub fn service(&self, member: &str) -> &EntityOwnershipService {
        self.services
            .iter()
            .find(|s| s.local_member().as_str() == member)
            .unwrap_or_else(|| panic!("no member {member}"))
    }

    /// Shut down every service.
    pub async fn shutdown(self) {
        for service in &self.services {
            service.shutdown().await;
        }
    }
}

/// Listener that records every change it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    changes: Mutex<Vec<OwnershipChange>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All changes received so far.
    pub fn changes(&self) -> Vec<OwnershipChange> {
        self.changes.lock().clone()
    }

    /// Changes received for one entity.
    pub fn changes_for(&self, entity: &Entity) -> Vec<OwnershipChange> {
        self.changes
            .lock()
            .iter()
            .filter(|c| &c.entity == entity)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.lock().is_empty()
    }

    /// The most recent change.
    pub fn last(&self) -> Option<OwnershipChange> {
        self.changes.lock().last().cloned()
    }
}

impl OwnershipListener for RecordingListener {
    fn ownership_changed(&self, change: &OwnershipChange) {
        self.changes.lock().push(change.clone());
    }
}

/// Listener that panics on every change.
#[derive(Debug, Default)]
pub struct PanickingListener {
    calls: AtomicUsize,
}

impl PanickingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of times the listener was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OwnershipListener for PanickingListener {
    fn ownership_changed(&self, change: &OwnershipChange) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("listener rejected change for {}", change.entity);
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Poll the ownership state of `entity` until it equals `expected`.
pub async fn wait_for_state(
    service: &EntityOwnershipService,
    entity: &Entity,
    expected: Option<OwnershipState>,
    timeout: Duration,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if matches!(service.get_ownership_state(entity).await, Ok(state) if state == expected) {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Ownership state helper.
pub fn owned(is_owner: bool) -> Option<OwnershipState> {
    Some(OwnershipState {
        is_owner,
        has_owner: true,
    })
}
