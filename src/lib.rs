//! Entity ownership over a replicated hierarchical store.
//!
//! Cluster members register as candidates for named entities; exactly one
//! candidate per entity is elected owner, and every member is told when its
//! ownership of an entity changes. Candidates and owners are kept in an
//! external consensus-backed tree, so ownership survives the failure of any
//! single member.
//!
//! This crate provides:
//! - **Serialized writes** with a single in-flight commit and transaction-id
//!   aware retries across leader changes
//! - **Change-feed translation** into candidate and owner events
//! - **Pluggable owner selection** resolved by name from configuration
//! - **Isolated listener delivery** on one thread per listener
//!
//! # Example
//!
//! ```rust,no_run
//! use regent::{Entity, EntityOwnershipService, MemoryStore, OwnershipChange, OwnershipConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new();
//!     store.elect("member-1");
//!
//!     let config = OwnershipConfig::new("member-1");
//!     let service = EntityOwnershipService::start(config, Arc::new(store.member("member-1"))).await?;
//!
//!     // Hear about ownership of every "service-group" entity
//!     let _listener = service.register_listener(
//!         "service-group",
//!         Arc::new(|change: &OwnershipChange| println!("{:?}", change)),
//!     )?;
//!
//!     // Compete for ownership; dropping the handle withdraws the candidacy
//!     let _candidate = service.register_candidate(Entity::new("service-group", "billing"))?;
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Application Layer                │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │         EntityOwnershipService API          │
//! │  • register_candidate(entity)               │
//! │  • register_listener(type, listener)        │
//! │  • get_ownership_state(entity)              │
//! └─────────────────────────────────────────────┘
//!                     │ commands
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │        Coordination loop (one task)         │
//! │  candidate mirror · owners · statistics     │
//! │  selection strategies · commit coordinator  │
//! └─────────────────────────────────────────────┘
//!        │ writes          ▲ change feed        │ transitions
//!        ▼                 │                    ▼
//! ┌─────────────────────────────┐   ┌──────────────────────┐
//! │      ReplicatedStore        │   │  Listener threads    │
//! └─────────────────────────────┘   └──────────────────────┘
//! ```
//!
//! # Elections
//!
//! Only the member whose store replica is the leader runs elections. Other
//! members mirror candidates and owners from the change feed and emit
//! transitions to their listeners. While the local replica is a leader
//! without quorum, transitions carry `in_jeopardy = true`.

pub mod config;
pub mod error;
pub mod metrics;
pub mod ownership;
pub mod store;
pub mod testing;
pub mod types;

// Re-exports for convenience
pub use config::{OwnershipConfig, StrategyConfig, StrategySpec};
pub use error::{Error, Result, StoreError};
pub use types::{
    CandidateName, Entity, EntityId, EntityType, OwnershipChange, OwnershipState, TransactionId,
};

pub use ownership::{
    CandidateRegistration, EntityOwnershipService, ListenerRegistration, OwnerSelectionStrategy,
    OwnershipListener, Selection, SelectionContext, StatisticsSnapshot, StrategyRegistry,
};

pub use store::{
    ChangeBatch, EntityRecord, LeaderStatus, MemoryStore, MemoryStoreHandle, Modification,
    ReplicatedStore, StorePath, WriteBatch,
};

pub use metrics::{MetricsSnapshot, OwnershipMetrics};
