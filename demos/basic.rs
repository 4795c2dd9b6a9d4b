//! Basic entity ownership example.
//!
//! Three members share an in-process store. Each registers as a candidate for
//! a few service groups, the store leader elects owners, and ownership moves
//! when the owner goes away.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic

use regent::{
    Entity, EntityOwnershipService, EntityType, MemoryStore, OwnershipChange, OwnershipConfig,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let store = MemoryStore::new();
    store.elect("member-1");

    let mut services = Vec::new();
    for member in ["member-1", "member-2", "member-3"] {
        let config = OwnershipConfig::new(member)
            .with_leader_election_timeout(Duration::from_millis(500));
        let service = EntityOwnershipService::start(config, Arc::new(store.member(member))).await?;
        services.push(service);
    }

    let mut listeners = Vec::new();
    for service in &services {
        let member = service.local_member().clone();
        let listener = service.register_listener(
            "service-group",
            Arc::new(move |change: &OwnershipChange| {
                if change.was_owner != change.is_owner {
                    println!(
                        "[{}] {} owner={} (has owner: {})",
                        member, change.entity, change.is_owner, change.has_owner
                    );
                }
            }),
        )?;
        listeners.push(listener);
    }

    // Every member competes for every group
    let groups = ["billing", "search", "inventory"];
    let mut candidates = Vec::new();
    for (index, service) in services.iter().enumerate() {
        for group in groups {
            let registration = service.register_candidate(Entity::new("service-group", group))?;
            candidates.push((index, registration));
        }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("\n=== Owners ===");
    for group in groups {
        let entity = Entity::new("service-group", group);
        println!("{} -> {:?}", entity, store.owner(&entity));
    }

    // member-1 withdraws from everything; its groups move to the next candidate
    println!("\n=== member-1 withdraws ===");
    candidates.retain(|(index, _)| *index != 0);
    tokio::time::sleep(Duration::from_millis(200)).await;

    for group in groups {
        let entity = Entity::new("service-group", group);
        println!("{} -> {:?}", entity, store.owner(&entity));
    }

    let stats = services[1]
        .ownership_statistics_for(&EntityType::new("service-group"))
        .await?;
    println!("\n=== Statistics ===");
    for (candidate, count) in stats {
        println!("{}: {}", candidate, count);
    }

    println!("\n=== Metrics (member-1) ===");
    print!("{}", services[0].metrics().to_prometheus());

    drop(candidates);
    drop(listeners);
    for service in &services {
        service.shutdown().await;
    }
    Ok(())
}
