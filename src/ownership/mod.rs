//! Entity ownership: candidates, elections and ownership notifications.
//!
//! # Components
//!
//! - [`CandidateRegistry`]: local mirror of candidate sets
//! - [`OwnershipStatistics`]: owned-entity counts per candidate
//! - translators: tree changes into [`ChangeEvent`]s
//! - [`CommitCoordinator`]: one write in flight, retries on failure
//! - [`OwnerSelectionStrategy`]: pluggable owner election
//! - [`ListenerRegistry`]: per-listener delivery threads
//! - [`EntityOwnershipService`]: the public API
//!
//! Everything except the listener threads runs inside one coordination task.

pub mod commit;
mod coordinator;
pub mod listener;
pub mod registry;
pub mod service;
pub mod statistics;
pub mod strategy;
pub mod translator;

pub use commit::{AckOutcome, CommitCoordinator};
pub use coordinator::StatisticsSnapshot;
pub use listener::{ListenerId, ListenerRegistry, OwnershipListener, SubscriptionKey};
pub use registry::CandidateRegistry;
pub use service::{CandidateRegistration, EntityOwnershipService, ListenerRegistration};
pub use statistics::OwnershipStatistics;
pub use strategy::{
    FirstCandidate, LeastLoaded, OwnerSelectionStrategy, PreferPrevious, Selection,
    SelectionContext, StrategyFactory, StrategyRegistry, StrategySet,
};
pub use translator::{translate_batch, ChangeEvent};
