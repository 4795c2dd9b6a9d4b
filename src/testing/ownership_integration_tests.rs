//! Integration tests for candidate registration, elections and queries.
//!
//! Every test runs one or more services against a shared MemoryStore with
//! a short election timeout.

#[cfg(test)]
mod tests {
    use crate::config::OwnershipConfig;
    use crate::error::Error;
    use crate::ownership::EntityOwnershipService;
    use crate::testing::{
        owned, wait_for_state, wait_until, RecordingListener, TestCluster, TEST_ELECTION_TIMEOUT,
        WAIT_TIMEOUT,
    };
    use crate::types::{CandidateName, Entity, EntityType, OwnershipChange};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use test_log::test;
    use tokio::time::sleep;

    fn svc(id: &str) -> Entity {
        Entity::new("svc", id)
    }

    fn name(s: &str) -> CandidateName {
        CandidateName::new(s)
    }

    async fn wait_for_statistics(
        service: &EntityOwnershipService,
        entity_type: &EntityType,
        expected: &HashMap<CandidateName, u64>,
    ) -> bool {
        let start = Instant::now();
        while start.elapsed() < WAIT_TIMEOUT {
            if service.ownership_statistics_for(entity_type).await.ok().as_ref() == Some(expected) {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_single_candidate_becomes_owner() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let service = cluster.service("A");
        let listener = RecordingListener::new();
        let _listener_reg = service.register_listener("svc", listener.clone()).unwrap();

        let entity = svc("x");
        let _candidate = service.register_candidate(entity.clone()).unwrap();

        assert!(wait_until(WAIT_TIMEOUT, || listener.len() == 1).await);
        assert_eq!(
            listener.changes()[0],
            OwnershipChange {
                entity: entity.clone(),
                was_owner: false,
                is_owner: true,
                has_owner: true,
                in_jeopardy: false,
            }
        );
        assert_eq!(cluster.store.candidates(&entity), vec![name("A")]);
        assert_eq!(cluster.store.owner(&entity), Some(name("A")));
        assert_eq!(service.get_ownership_state(&entity).await.unwrap(), owned(true));

        // Exactly once.
        sleep(Duration::from_millis(100)).await;
        assert_eq!(listener.len(), 1);

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_owner_unregisters() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let service = cluster.service("A");
        let listener = RecordingListener::new();
        let _listener_reg = service.register_listener("svc", listener.clone()).unwrap();

        let entity = svc("x");
        let candidate = service.register_candidate(entity.clone()).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || listener.len() == 1).await);

        candidate.close();
        assert!(!service.is_candidate_registered(&entity));

        assert!(wait_until(WAIT_TIMEOUT, || listener.len() == 2).await);
        assert_eq!(
            listener.changes()[1],
            OwnershipChange {
                entity: entity.clone(),
                was_owner: true,
                is_owner: false,
                has_owner: false,
                in_jeopardy: false,
            }
        );
        assert_eq!(cluster.store.owner(&entity), None);
        assert!(cluster.store.candidates(&entity).is_empty());
        assert!(wait_for_state(service, &entity, None, WAIT_TIMEOUT).await);

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_duplicate_registration_rejected() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let service = cluster.service("A");
        let entity = svc("x");

        let first = service.register_candidate(entity.clone()).unwrap();
        let second = service.register_candidate(entity.clone());
        assert!(matches!(second, Err(Error::CandidateAlreadyRegistered(ref e)) if *e == entity));
        assert!(service.is_candidate_registered(&entity));

        assert!(wait_until(WAIT_TIMEOUT, || cluster.store.owner(&entity).is_some()).await);
        assert_eq!(cluster.store.candidates(&entity), vec![name("A")]);

        // Released registrations can be made again.
        drop(first);
        assert!(!service.is_candidate_registered(&entity));
        let _again = service.register_candidate(entity.clone()).unwrap();
        assert!(service.is_candidate_registered(&entity));

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_single_owner_across_members() {
        let cluster = TestCluster::start(&["A", "B", "C"], "A").await;
        let entity = svc("x");

        let _regs: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|m| cluster.service(m).register_candidate(entity.clone()).unwrap())
            .collect();

        assert!(wait_until(WAIT_TIMEOUT, || cluster.store.candidates(&entity).len() == 3).await);
        assert!(wait_until(WAIT_TIMEOUT, || cluster.store.owner(&entity).is_some()).await);
        let owner = cluster.store.owner(&entity).unwrap();

        let mut owners = 0;
        for member in ["A", "B", "C"] {
            let service = cluster.service(member);
            let expected = owned(owner.as_str() == member);
            assert!(wait_for_state(service, &entity, expected, WAIT_TIMEOUT).await);
            if expected == owned(true) {
                owners += 1;
            }
        }
        assert_eq!(owners, 1);

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_follower_candidate_elected_by_leader() {
        let cluster = TestCluster::start(&["A", "B"], "A").await;
        let on_a = RecordingListener::new();
        let on_b = RecordingListener::new();
        let _reg_a = cluster.service("A").register_listener("svc", on_a.clone()).unwrap();
        let _reg_b = cluster.service("B").register_listener("svc", on_b.clone()).unwrap();

        let entity = svc("x");
        let _candidate = cluster.service("B").register_candidate(entity.clone()).unwrap();

        assert!(wait_until(WAIT_TIMEOUT, || on_b.len() == 1 && on_a.len() == 1).await);
        let seen_by_b = on_b.last().unwrap();
        assert!(!seen_by_b.was_owner && seen_by_b.is_owner && seen_by_b.has_owner);
        let seen_by_a = on_a.last().unwrap();
        assert!(!seen_by_a.was_owner && !seen_by_a.is_owner && seen_by_a.has_owner);

        assert_eq!(
            cluster.service("A").get_ownership_state(&entity).await.unwrap(),
            owned(false)
        );

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_no_spurious_transitions() {
        let cluster = TestCluster::start(&["A", "B", "C"], "A").await;
        let on_a = RecordingListener::new();
        let on_b = RecordingListener::new();
        let _reg_a = cluster.service("A").register_listener("svc", on_a.clone()).unwrap();
        let _reg_b = cluster.service("B").register_listener("svc", on_b.clone()).unwrap();

        let entity = svc("x");
        let _owner = cluster.service("A").register_candidate(entity.clone()).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || on_a.len() == 1 && on_b.len() == 1).await);

        let b = cluster.service("B").register_candidate(entity.clone()).unwrap();
        let _c = cluster.service("C").register_candidate(entity.clone()).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || cluster.store.candidates(&entity).len() == 3).await);
        b.close();
        assert!(
            wait_until(WAIT_TIMEOUT, || cluster.store.candidates(&entity)
                == vec![name("A"), name("C")])
            .await
        );

        sleep(Duration::from_millis(100)).await;
        assert_eq!(cluster.store.owner(&entity), Some(name("A")));
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_b.len(), 1);

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_statistics_match_owned_entities() {
        let cluster = TestCluster::start(&["A", "B"], "A").await;
        let mut regs = Vec::new();
        for i in 0..5 {
            regs.push(cluster.service("A").register_candidate(svc(&i.to_string())).unwrap());
        }
        for i in 5..8 {
            regs.push(cluster.service("B").register_candidate(svc(&i.to_string())).unwrap());
        }
        regs.push(
            cluster
                .service("B")
                .register_candidate(Entity::new("lock", "x"))
                .unwrap(),
        );

        let svc_type = EntityType::new("svc");
        let expected = HashMap::from([(name("A"), 5), (name("B"), 3)]);
        for member in ["A", "B"] {
            assert!(wait_for_statistics(cluster.service(member), &svc_type, &expected).await);
        }

        let all = cluster.service("B").ownership_statistics().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&EntityType::new("lock")], HashMap::from([(name("B"), 1)]));
        let owned_total: u64 = all[&svc_type].values().sum();
        assert_eq!(owned_total, 8);

        // Releasing three of A's entities moves the counts down.
        for reg in regs.drain(0..3) {
            reg.close();
        }
        let expected = HashMap::from([(name("A"), 2), (name("B"), 3)]);
        assert!(wait_for_statistics(cluster.service("B"), &svc_type, &expected).await);

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_state_of_unknown_entity_is_none() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let service = cluster.service("A");

        assert_eq!(service.get_ownership_state(&svc("nothing")).await.unwrap(), None);
        assert!(service
            .ownership_statistics_for(&EntityType::new("svc"))
            .await
            .unwrap()
            .is_empty());

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_late_member_sees_existing_state() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let entity = svc("x");
        let _candidate = cluster.service("A").register_candidate(entity.clone()).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || cluster.store.owner(&entity).is_some()).await);

        // Queried right after start, answered either from the store or the mirror.
        let late = EntityOwnershipService::start(
            OwnershipConfig::new("Z").with_leader_election_timeout(TEST_ELECTION_TIMEOUT),
            Arc::new(cluster.store.member("Z")),
        )
        .await
        .unwrap();
        assert_eq!(late.get_ownership_state(&entity).await.unwrap(), owned(false));
        assert_eq!(late.get_ownership_state(&svc("y")).await.unwrap(), None);

        late.shutdown().await;
        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_calls_after_shutdown_fail() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let service = cluster.service("A");
        service.shutdown().await;

        assert!(matches!(
            service.register_candidate(svc("x")),
            Err(Error::ServiceStopped)
        ));
        assert!(matches!(
            service.get_ownership_state(&svc("x")).await,
            Err(Error::ServiceStopped)
        ));
    }
}
