mod test_helpers;

use shardwalk::command::CommandOutcome;
use shardwalk::keys;
use shardwalk::store::CoordinationStore;
use shardwalk::verifier::ConvergenceCheck;
use std::time::Duration;
use test_helpers::*;

#[shardwalk::test(flavor = "multi_thread", worker_threads = 4)]
async fn rebalanced_cluster_converges() {
    let (store, registry) = sim_registry(fast_config());
    registry.setup_cluster("rebalanced", shape(2, 6, 3, 2)).await.unwrap();
    registry.start_participants("rebalanced", &[0, 1, 2]).await.unwrap();
    registry.start_controller("rebalanced").await.unwrap();

    assert!(registry.verify_cluster("rebalanced", Duration::ZERO).await.unwrap());

    let view = store
        .read(&keys::external_view_path("TestDriver_rebalanced", "TestDB1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.assignment().len(), 12);

    registry.stop_cluster("rebalanced").await.unwrap();
    assert!(
        store
            .children(&keys::live_instances_prefix("TestDriver_rebalanced"))
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        !store
            .exists(&keys::controller_leader_path("TestDriver_rebalanced"))
            .await
            .unwrap()
    );
}

#[shardwalk::test(flavor = "multi_thread", worker_threads = 4)]
async fn partial_ideal_state_converges() {
    let (_store, registry) = sim_registry(fast_config());
    registry
        .setup_cluster_without_rebalance("partial", shape(1, 8, 3, 3))
        .await
        .unwrap();
    registry.start_participants("partial", &[0, 1, 2]).await.unwrap();
    registry.start_controller("partial").await.unwrap();
    assert!(registry.verify_cluster("partial", Duration::ZERO).await.unwrap());

    let batch = registry
        .set_ideal_state("partial", Duration::from_millis(50), 40)
        .await
        .unwrap();
    assert_eq!(batch.outcomes().await, vec![CommandOutcome::Completed]);

    assert!(registry.verify_cluster("partial", Duration::from_millis(20)).await.unwrap());
    registry.stop_cluster("partial").await.unwrap();
}

#[shardwalk::test(flavor = "multi_thread", worker_threads = 4)]
async fn cluster_converges_on_live_hosts_after_participant_stop() {
    let (store, registry) = sim_registry(fast_config());
    registry.setup_cluster("failover", shape(1, 4, 3, 2)).await.unwrap();
    registry.start_participants("failover", &[0, 1, 2]).await.unwrap();
    registry.start_controller("failover").await.unwrap();
    assert!(registry.verify_cluster("failover", Duration::ZERO).await.unwrap());

    let batch = registry
        .stop_participant("failover", Duration::from_millis(50), 1)
        .await
        .unwrap()
        .expect("participant 1 is running");
    assert_eq!(batch.outcomes().await, vec![CommandOutcome::Completed]);
    assert!(
        !store
            .exists(&keys::live_instance_path("TestDriver_failover", "localhost_12919"))
            .await
            .unwrap()
    );

    assert!(
        registry
            .verify_cluster_with(
                "failover",
                Duration::ZERO,
                ConvergenceCheck::LiveInstancesMatch
            )
            .await
            .unwrap()
    );
    registry.stop_cluster("failover").await.unwrap();
}

#[shardwalk::test(flavor = "multi_thread", worker_threads = 2)]
async fn verify_fails_without_a_controller() {
    let mut cfg = fast_config();
    cfg.timing.verify_timeout_ms = 300;
    let (_store, registry) = sim_registry(cfg);
    registry.setup_cluster("headless", shape(1, 2, 2, 1)).await.unwrap();
    registry.start_participants("headless", &[0, 1]).await.unwrap();

    assert!(!registry.verify_cluster("headless", Duration::ZERO).await.unwrap());
    registry.stop_cluster("headless").await.unwrap();
}
