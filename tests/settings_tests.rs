mod test_helpers;

use shardwalk::settings::{HarnessConfig, LogFormat};
use shardwalk::transition::Strictness;
use std::io::Write;
use std::time::Duration;
use test_helpers::{shape, sim_registry};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[shardwalk::test]
fn load_without_path_uses_defaults() {
    let cfg = HarnessConfig::load(None).unwrap();
    assert_eq!(cfg.store.address, "memory://local");
    assert_eq!(cfg.naming.start_port, 12918);
    assert_eq!(cfg.timing.settle_interval(), Duration::from_secs(1));
    assert_eq!(cfg.logging.format, LogFormat::Text);
}

#[shardwalk::test]
fn load_reads_toml_file() {
    let file = write_config(
        r#"
        [store]
        address = "memory://scenario"

        [naming]
        cluster_prefix = "Chaos"
        participant_prefix = "node"
        start_port = 7000

        [naming.state_model]
        name = "LeaderStandby"
        primary = "LEADER"
        secondary = "STANDBY"

        [planner]
        strictness = "strict"
        "#,
    );
    let cfg = HarnessConfig::load(Some(file.path())).unwrap();
    assert_eq!(cfg.store.address, "memory://scenario");
    assert_eq!(cfg.naming.cluster_name("s1"), "Chaos_s1");
    assert_eq!(cfg.naming.participant_name(2), "node_7002");
    assert_eq!(cfg.naming.resource_name(1), "TestDB1");
    assert_eq!(cfg.naming.state_model.to_model().primary(), "LEADER");
    assert_eq!(cfg.planner.strictness, Strictness::Strict);
    assert_eq!(cfg.timing.verify_timeout(), Duration::from_secs(60));
}

#[shardwalk::test]
fn load_rejects_missing_and_malformed_files() {
    let dir = tempfile::tempdir().unwrap();
    assert!(HarnessConfig::load(Some(&dir.path().join("absent.toml"))).is_err());

    let file = write_config("[timing]\nverify_timeout_ms = \"soon\"\n");
    assert!(HarnessConfig::load(Some(file.path())).is_err());
}

#[shardwalk::test(flavor = "multi_thread", worker_threads = 2)]
async fn configured_names_flow_into_the_cluster() {
    let file = write_config(
        r#"
        [naming]
        cluster_prefix = "Chaos"
        resource_prefix = "Orders"

        [naming.state_model]
        name = "LeaderStandby"
        primary = "LEADER"
        secondary = "STANDBY"

        [timing]
        verify_timeout_ms = 5000
        poll_interval_ms = 10
        settle_interval_ms = 10
        sim_tick_ms = 5
        "#,
    );
    let cfg = HarnessConfig::load(Some(file.path())).unwrap();
    let (_store, registry) = sim_registry(cfg);
    assert_eq!(registry.state_model().secondary(), "STANDBY");

    let session = registry.setup_cluster("names", shape(1, 3, 2, 2)).await.unwrap();
    assert_eq!(session.cluster_name, "Chaos_names");
    let ideal = session.ideal_state("Orders0").await.unwrap();
    assert!(
        ideal
            .assignment()
            .iter_roles()
            .all(|(_, _, role)| role == "LEADER" || role == "STANDBY")
    );

    registry.start_participants("names", &[0, 1]).await.unwrap();
    registry.start_controller("names").await.unwrap();
    assert!(registry.verify_cluster("names", Duration::ZERO).await.unwrap());
    registry.stop_cluster("names").await.unwrap();
}
