//! Integration tests for listener registration and delivery.

#[cfg(test)]
mod tests {
    use crate::testing::{wait_until, PanickingListener, RecordingListener, TestCluster, WAIT_TIMEOUT};
    use crate::types::Entity;
    use std::time::Duration;
    use test_log::test;
    use tokio::time::sleep;

    fn svc(id: &str) -> Entity {
        Entity::new("svc", id)
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_panicking_listener_does_not_block_others() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let service = cluster.service("A");
        let panicking = PanickingListener::new();
        let recording = RecordingListener::new();
        let _p = service.register_listener("svc", panicking.clone()).unwrap();
        let _r = service.register_listener("svc", recording.clone()).unwrap();

        let entity = svc("x");
        let candidate = service.register_candidate(entity.clone()).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || recording.len() == 1).await);

        candidate.close();
        assert!(wait_until(WAIT_TIMEOUT, || recording.len() == 2).await);
        assert!(wait_until(WAIT_TIMEOUT, || panicking.calls() == 2).await);
        assert!(wait_until(WAIT_TIMEOUT, || service.metrics().listener_failures.get() == 2).await);

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_shared_channel_torn_down_with_last_registration() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let service = cluster.service("A");
        let metrics = service.metrics();
        let listener = RecordingListener::new();

        let by_svc = service.register_listener("svc", listener.clone()).unwrap();
        let by_lock = service.register_listener("lock", listener.clone()).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || metrics.listener_channels.get() == 1).await);

        by_svc.close();
        let _y = service.register_candidate(svc("y")).unwrap();
        let lock = Entity::new("lock", "x");
        let _x = service.register_candidate(lock.clone()).unwrap();

        assert!(wait_until(WAIT_TIMEOUT, || listener.len() == 1).await);
        assert_eq!(listener.changes()[0].entity, lock);
        assert_eq!(metrics.listener_channels.get(), 1);

        drop(by_lock);
        assert!(wait_until(WAIT_TIMEOUT, || metrics.listener_channels.get() == 0).await);

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_entity_listener_sees_only_its_entity() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let service = cluster.service("A");
        let listener = RecordingListener::new();
        let _reg = service
            .register_entity_listener(svc("x"), listener.clone())
            .unwrap();

        let _y = service.register_candidate(svc("y")).unwrap();
        let _x = service.register_candidate(svc("x")).unwrap();

        assert!(wait_until(WAIT_TIMEOUT, || listener.len() == 1).await);
        assert!(wait_until(WAIT_TIMEOUT, || cluster.store.owner(&svc("y")).is_some()).await);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.changes_for(&svc("x")).len(), 1);
        assert!(listener.changes_for(&svc("y")).is_empty());

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_type_and_entity_subscription_notified_once() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let service = cluster.service("A");
        let listener = RecordingListener::new();
        let _by_type = service.register_listener("svc", listener.clone()).unwrap();
        let _by_entity = service
            .register_entity_listener(svc("x"), listener.clone())
            .unwrap();

        let _x = service.register_candidate(svc("x")).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || listener.len() == 1).await);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(listener.len(), 1);
        assert_eq!(service.metrics().listener_channels.get(), 1);

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_late_listener_receives_current_owners() {
        let cluster = TestCluster::start(&["A", "B"], "A").await;
        let _x = cluster.service("A").register_candidate(svc("x")).unwrap();
        let _y = cluster.service("B").register_candidate(svc("y")).unwrap();
        let _z = cluster
            .service("A")
            .register_candidate(Entity::new("lock", "z"))
            .unwrap();
        assert!(
            wait_until(WAIT_TIMEOUT, || {
                cluster.store.owner(&svc("x")).is_some()
                    && cluster.store.owner(&svc("y")).is_some()
            })
            .await
        );

        let listener = RecordingListener::new();
        // The mirror of A may trail the store slightly.
        sleep(Duration::from_millis(50)).await;
        let _reg = cluster.service("A").register_listener("svc", listener.clone()).unwrap();

        assert!(wait_until(WAIT_TIMEOUT, || listener.len() == 2).await);
        let x = listener.changes_for(&svc("x"));
        assert!(!x[0].was_owner && x[0].is_owner && x[0].has_owner);
        let y = listener.changes_for(&svc("y"));
        assert!(!y[0].was_owner && !y[0].is_owner && y[0].has_owner);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.len(), 2);

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_same_listener_registered_twice_survives_one_close() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let service = cluster.service("A");
        let metrics = service.metrics();
        let listener = RecordingListener::new();

        let _x = service.register_candidate(svc("x")).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || cluster.store.owner(&svc("x")).is_some()).await);
        sleep(Duration::from_millis(50)).await;

        let first = service.register_listener("svc", listener.clone()).unwrap();
        let _second = service.register_listener("svc", listener.clone()).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || listener.len() == 1).await);

        first.close();
        let _y = service.register_candidate(svc("y")).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || listener.changes_for(&svc("y")).len() == 1).await);

        // Current owners are announced once, not once per registration.
        sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.changes_for(&svc("x")).len(), 1);
        assert_eq!(metrics.listener_channels.get(), 1);

        cluster.shutdown().await;
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_closed_listener_not_notified() {
        let cluster = TestCluster::start(&["A"], "A").await;
        let service = cluster.service("A");
        let listener = RecordingListener::new();
        service
            .register_listener("svc", listener.clone())
            .unwrap()
            .close();

        let entity = svc("x");
        let _x = service.register_candidate(entity.clone()).unwrap();
        assert!(wait_until(WAIT_TIMEOUT, || cluster.store.owner(&entity).is_some()).await);
        sleep(Duration::from_millis(50)).await;
        assert!(listener.is_empty());

        cluster.shutdown().await;
    }
}
