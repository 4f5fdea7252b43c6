#![allow(dead_code)]

use async_trait::async_trait;
use shardwalk::admin::StoreClusterAdmin;
use shardwalk::calculator::RendezvousCalculator;
use shardwalk::process::{
    ClusterProcess, ControllerMode, ProcessError, ProcessFactory, ProcessKind, RunningProcess,
};
use shardwalk::record::AssignmentSnapshot;
use shardwalk::registry::{ClusterShape, SessionRegistry};
use shardwalk::settings::HarnessConfig;
use shardwalk::sim::SimProcessFactory;
use shardwalk::store::{CoordinationStore, MemoryStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// Helper: enforce a tight timeout for async tests likely to hang
#[macro_export]
macro_rules! with_timeout {
    ($ms:expr, $body:block) => {{
        tokio::time::timeout(std::time::Duration::from_millis($ms), async move { $body })
            .await
            .expect("test timed out")
    }};
}

/// Config with short timings so scenarios finish quickly.
pub fn fast_config() -> HarnessConfig {
    let mut cfg = HarnessConfig::default();
    cfg.timing.verify_timeout_ms = 5_000;
    cfg.timing.poll_interval_ms = 10;
    cfg.timing.settle_interval_ms = 20;
    cfg.timing.sim_tick_ms = 5;
    cfg
}

pub fn shape(num_resources: u32, partitions: u32, num_nodes: u32, replica: u32) -> ClusterShape {
    ClusterShape {
        num_resources,
        partitions_per_resource: partitions,
        num_nodes,
        replica,
    }
}

/// Registry wired to an in-memory store and simulated members.
pub fn sim_registry(cfg: HarnessConfig) -> (Arc<MemoryStore>, SessionRegistry) {
    let store = Arc::new(MemoryStore::new("memory://test"));
    let calculator = Arc::new(RendezvousCalculator);
    let model = cfg.naming.state_model.to_model();
    let admin = Arc::new(StoreClusterAdmin::new(
        store.clone(),
        calculator.clone(),
        model.clone(),
    ));
    let factory = Arc::new(SimProcessFactory::new(model, cfg.timing.sim_tick()));
    let registry = SessionRegistry::new(cfg, store.clone(), factory, admin, calculator).with_seed(42);
    (store, registry)
}

/// Registry whose members are inert fakes that record every disconnect.
pub fn recording_registry(cfg: HarnessConfig) -> (Arc<RecordingFactory>, SessionRegistry) {
    let store = Arc::new(MemoryStore::new("memory://test"));
    let calculator = Arc::new(RendezvousCalculator);
    let admin = Arc::new(StoreClusterAdmin::new(
        store.clone(),
        calculator.clone(),
        cfg.naming.state_model.to_model(),
    ));
    let factory = Arc::new(RecordingFactory::default());
    let registry = SessionRegistry::new(cfg, store, factory.clone(), admin, calculator);
    (factory, registry)
}

pub fn snapshot(roles: &[(&str, &str, &str)]) -> AssignmentSnapshot {
    roles.iter().copied().collect()
}

/// A member that does nothing but remember being disconnected.
pub struct FakeProcess {
    name: String,
    kind: ProcessKind,
    connected: AtomicBool,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ClusterProcess for FakeProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProcessKind {
        self.kind
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.log.lock().unwrap().push(self.name.clone());
        }
    }
}

#[derive(Default)]
pub struct RecordingFactory {
    pub started: Mutex<Vec<String>>,
    pub disconnects: Arc<Mutex<Vec<String>>>,
}

impl RecordingFactory {
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.disconnects.lock().unwrap().clone()
    }

    fn spawn(&self, name: &str, kind: ProcessKind) -> RunningProcess {
        self.started.lock().unwrap().push(name.to_string());
        let process = Arc::new(FakeProcess {
            name: name.to_string(),
            kind,
            connected: AtomicBool::new(true),
            log: Arc::clone(&self.disconnects),
        });
        let task = tokio::spawn(std::future::pending::<()>());
        RunningProcess::new(process, task)
    }
}

#[async_trait]
impl ProcessFactory for RecordingFactory {
    async fn start_participant(
        &self,
        _store: Arc<dyn CoordinationStore>,
        _cluster: &str,
        instance: &str,
    ) -> Result<RunningProcess, ProcessError> {
        Ok(self.spawn(instance, ProcessKind::Participant))
    }

    async fn start_controller(
        &self,
        _store: Arc<dyn CoordinationStore>,
        _cluster: &str,
        name: &str,
        _mode: ControllerMode,
    ) -> Result<RunningProcess, ProcessError> {
        Ok(self.spawn(name, ProcessKind::Controller))
    }
}
