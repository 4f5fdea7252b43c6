mod test_helpers;

use async_trait::async_trait;
use shardwalk::keys;
use shardwalk::record::Record;
use shardwalk::store::{CoordinationStore, MemoryStore, StoreError, WriteMode};
use shardwalk::verifier::{ConvergenceCheck, ConvergenceVerifier};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_helpers::snapshot;

const CLUSTER: &str = "TestDriver_verify";
const RESOURCE: &str = "TestDB0";

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn record_for(roles: &[(&str, &str, &str)]) -> Record {
    let mut record = Record::new(RESOURCE);
    record.set_assignment(snapshot(roles));
    record
}

async fn write(store: &MemoryStore, path: &str, record: &Record) {
    store.write(path, record, WriteMode::Replace).await.unwrap();
}

fn verifier(store: &Arc<MemoryStore>) -> ConvergenceVerifier {
    ConvergenceVerifier::new(store.clone(), Duration::from_millis(20))
}

#[shardwalk::test]
async fn converged_cluster_passes_on_first_poll() {
    let store = Arc::new(MemoryStore::new("memory://test"));
    let roles = [("TestDB0_0", "h0", "MASTER"), ("TestDB0_0", "h1", "SLAVE")];
    write(&store, &keys::ideal_state_path(CLUSTER, RESOURCE), &record_for(&roles)).await;
    write(&store, &keys::external_view_path(CLUSTER, RESOURCE), &record_for(&roles)).await;

    let start = Instant::now();
    let ok = verifier(&store)
        .verify(
            &set(&[CLUSTER]),
            &set(&[RESOURCE]),
            Duration::from_secs(5),
            ConvergenceCheck::ExactMatch,
        )
        .await;
    assert!(ok);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[shardwalk::test]
async fn never_updating_external_view_times_out() {
    let store = Arc::new(MemoryStore::new("memory://test"));
    write(
        &store,
        &keys::ideal_state_path(CLUSTER, RESOURCE),
        &record_for(&[("TestDB0_0", "h0", "MASTER")]),
    )
    .await;

    let start = Instant::now();
    let ok = verifier(&store)
        .verify(
            &set(&[CLUSTER]),
            &set(&[RESOURCE]),
            Duration::from_millis(500),
            ConvergenceCheck::ExactMatch,
        )
        .await;
    let elapsed = start.elapsed();
    assert!(!ok);
    assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(700), "{elapsed:?}");
}

#[shardwalk::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_external_view_is_picked_up() {
    let store = Arc::new(MemoryStore::new("memory://test"));
    let roles = [("TestDB0_0", "h0", "MASTER")];
    write(&store, &keys::ideal_state_path(CLUSTER, RESOURCE), &record_for(&roles)).await;

    let writer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        write(&writer, &keys::external_view_path(CLUSTER, RESOURCE), &record_for(&roles)).await;
    });

    let ok = with_timeout!(3_000, {
        verifier(&store)
            .verify(
                &set(&[CLUSTER]),
                &set(&[RESOURCE]),
                Duration::from_secs(2),
                ConvergenceCheck::ExactMatch,
            )
            .await
    });
    assert!(ok);
}

#[shardwalk::test]
async fn every_resource_must_converge() {
    let store = Arc::new(MemoryStore::new("memory://test"));
    let roles = [("p0", "h0", "MASTER")];
    for resource in ["TestDB0", "TestDB1"] {
        write(&store, &keys::ideal_state_path(CLUSTER, resource), &record_for(&roles)).await;
    }
    write(&store, &keys::external_view_path(CLUSTER, "TestDB0"), &record_for(&roles)).await;

    let ok = verifier(&store)
        .verify(
            &set(&[CLUSTER]),
            &set(&["TestDB0", "TestDB1"]),
            Duration::from_millis(200),
            ConvergenceCheck::ExactMatch,
        )
        .await;
    assert!(!ok);
}

#[shardwalk::test]
async fn live_instances_check_ignores_stopped_hosts() {
    let store = Arc::new(MemoryStore::new("memory://test"));
    write(
        &store,
        &keys::ideal_state_path(CLUSTER, RESOURCE),
        &record_for(&[("p0", "h0", "MASTER"), ("p0", "h1", "SLAVE")]),
    )
    .await;
    write(
        &store,
        &keys::external_view_path(CLUSTER, RESOURCE),
        &record_for(&[("p0", "h0", "MASTER")]),
    )
    .await;
    write(&store, &keys::live_instance_path(CLUSTER, "h0"), &Record::new("h0")).await;

    let clusters = set(&[CLUSTER]);
    let resources = set(&[RESOURCE]);
    let v = verifier(&store);
    assert!(
        !v.verify(&clusters, &resources, Duration::from_millis(100), ConvergenceCheck::ExactMatch)
            .await
    );
    assert!(
        v.verify(
            &clusters,
            &resources,
            Duration::from_millis(100),
            ConvergenceCheck::LiveInstancesMatch
        )
        .await
    );
}

#[shardwalk::test]
async fn custom_predicate_sees_the_resource_view() {
    let store = Arc::new(MemoryStore::new("memory://test"));
    write(
        &store,
        &keys::ideal_state_path(CLUSTER, RESOURCE),
        &record_for(&[("p0", "h0", "MASTER")]),
    )
    .await;

    let ok = verifier(&store)
        .verify_with(
            &set(&[CLUSTER]),
            &set(&[RESOURCE]),
            Duration::from_millis(100),
            |view| {
                view.cluster == CLUSTER
                    && view.ideal_state.is_some()
                    && view.external_view.is_none()
                    && view.live_instances.is_empty()
            },
        )
        .await;
    assert!(ok);
}

/// A store whose calls never complete.
struct StalledStore;

#[async_trait]
impl CoordinationStore for StalledStore {
    fn address(&self) -> &str {
        "stalled://test"
    }

    async fn read(&self, _path: &str) -> Result<Option<Record>, StoreError> {
        std::future::pending().await
    }

    async fn write(&self, _path: &str, _record: &Record, _mode: WriteMode) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn delete_recursive(&self, _path: &str) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn exists(&self, _path: &str) -> Result<bool, StoreError> {
        std::future::pending().await
    }

    async fn children(&self, _path: &str) -> Result<Vec<String>, StoreError> {
        std::future::pending().await
    }
}

#[shardwalk::test]
async fn stalled_store_still_times_out() {
    let verifier = ConvergenceVerifier::new(Arc::new(StalledStore), Duration::from_millis(20));

    let start = Instant::now();
    let ok = with_timeout!(2_000, {
        verifier
            .verify(
                &set(&[CLUSTER]),
                &set(&[RESOURCE]),
                Duration::from_millis(500),
                ConvergenceCheck::ExactMatch,
            )
            .await
    });
    let elapsed = start.elapsed();
    assert!(!ok);
    assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(700), "{elapsed:?}");
}
