//! Test sessions and the lifecycle of their simulated cluster members.
//!
//! A [`SessionRegistry`] is built once per scenario with its collaborators
//! (store, process factory, admin tool, calculator) and passed around.
//! Sessions are keyed by a unique name. Each session owns the processes it
//! started and the last assignment it pushed per resource.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::admin::ClusterAdmin;
use crate::calculator::AssignmentCalculator;
use crate::command::{CommandExecutor, ScheduledBatch, TimedCommand};
use crate::keys;
use crate::process::{ControllerMode, ProcessError, ProcessFactory, ProcessKind, RunningProcess};
use crate::record::{AssignmentSnapshot, Record, ideal_state};
use crate::settings::HarnessConfig;
use crate::state_model::StateModel;
use crate::store::{CoordinationStore, StoreError, WriteMode};
use crate::synthesizer::steps_for_percentage;
use crate::transition::{TransitionError, TransitionPlanner};
use crate::verifier::{ConvergenceCheck, ConvergenceVerifier};

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("test cluster hasn't been setup: {0}")]
    SessionNotFound(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("process error: {0}")]
    Process(#[from] ProcessError),
    #[error("transition error: {0}")]
    Transition(#[from] TransitionError),
    #[error("percentage must be between 0 and 100, got {0}")]
    InvalidPercentage(u32),
}

/// Shape of a test cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterShape {
    pub num_resources: u32,
    pub partitions_per_resource: u32,
    pub num_nodes: u32,
    pub replica: u32,
}

/// Names started and skipped by a start call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StartReport {
    pub started: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct TestSession {
    pub name: String,
    pub cluster_name: String,
    pub shape: ClusterShape,
    store: Arc<dyn CoordinationStore>,
    ideal_states: Mutex<HashMap<String, Record>>,
    processes: Mutex<HashMap<String, RunningProcess>>,
}

impl TestSession {
    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Last ideal state pushed (or read at setup) for a resource.
    pub async fn ideal_state(&self, resource: &str) -> Option<Record> {
        self.ideal_states.lock().await.get(resource).cloned()
    }

    pub async fn process_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processes.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_running(&self, process_name: &str) -> bool {
        self.processes.lock().await.contains_key(process_name)
    }

    /// Stop controllers, wait `settle`, then stop every remaining process.
    async fn stop_all(&self, settle: Duration) {
        for process in self.take_processes(Some(ProcessKind::Controller)).await {
            process.stop().await;
        }
        tokio::time::sleep(settle).await;
        for process in self.take_processes(None).await {
            process.stop().await;
        }
    }

    async fn take_processes(&self, kind: Option<ProcessKind>) -> Vec<RunningProcess> {
        let mut processes = self.processes.lock().await;
        let names: Vec<String> = processes
            .iter()
            .filter(|(_, p)| kind.is_none_or(|k| p.kind() == k))
            .map(|(name, _)| name.clone())
            .collect();
        names
            .into_iter()
            .filter_map(|name| processes.remove(&name))
            .collect()
    }
}

pub struct SessionRegistry {
    config: HarnessConfig,
    store: Arc<dyn CoordinationStore>,
    factory: Arc<dyn ProcessFactory>,
    admin: Arc<dyn ClusterAdmin>,
    calculator: Arc<dyn AssignmentCalculator>,
    planner: TransitionPlanner,
    executor: CommandExecutor,
    sessions: Mutex<HashMap<String, Arc<TestSession>>>,
    rng: std::sync::Mutex<StdRng>,
}

impl SessionRegistry {
    pub fn new(
        config: HarnessConfig,
        store: Arc<dyn CoordinationStore>,
        factory: Arc<dyn ProcessFactory>,
        admin: Arc<dyn ClusterAdmin>,
        calculator: Arc<dyn AssignmentCalculator>,
    ) -> Self {
        let planner = TransitionPlanner::new(
            config.naming.state_model.to_model(),
            config.planner.strictness,
        );
        Self {
            executor: CommandExecutor::new(Arc::clone(&store)),
            config,
            store,
            factory,
            admin,
            calculator,
            planner,
            sessions: Mutex::new(HashMap::new()),
            rng: std::sync::Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Use a seeded generator for partial-progress synthesis.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: std::sync::Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn state_model(&self) -> &StateModel {
        self.planner.model()
    }

    pub async fn session(&self, name: &str) -> Result<Arc<TestSession>, HarnessError> {
        self.sessions
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::SessionNotFound(name.to_string()))
    }

    pub fn participant_names(&self, shape: &ClusterShape) -> Vec<String> {
        (0..shape.num_nodes)
            .map(|i| self.config.naming.participant_name(i))
            .collect()
    }

    pub fn resource_names(&self, shape: &ClusterShape) -> Vec<String> {
        (0..shape.num_resources)
            .map(|i| self.config.naming.resource_name(i))
            .collect()
    }

    /// Create the cluster namespace, hosts and resources for a new session,
    /// then rebalance every resource.
    pub async fn setup_cluster(
        &self,
        session: &str,
        shape: ClusterShape,
    ) -> Result<Arc<TestSession>, HarnessError> {
        self.setup_cluster_with(session, shape, true).await
    }

    pub async fn setup_cluster_without_rebalance(
        &self,
        session: &str,
        shape: ClusterShape,
    ) -> Result<Arc<TestSession>, HarnessError> {
        self.setup_cluster_with(session, shape, false).await
    }

    async fn setup_cluster_with(
        &self,
        session: &str,
        shape: ClusterShape,
        rebalance: bool,
    ) -> Result<Arc<TestSession>, HarnessError> {
        let replaced = self.sessions.lock().await.remove(session);
        if let Some(old) = replaced {
            warn!(
                session,
                "test session already registered; stopping its processes and replacing it"
            );
            old.stop_all(self.config.timing.settle_interval()).await;
        }

        let cluster_name = self.config.naming.cluster_name(session);
        let root = keys::cluster_root(&cluster_name);
        if self.store.exists(&root).await? {
            warn!(
                cluster = %cluster_name,
                session,
                "test cluster already exists; session name is not unique or a previous run was not cleaned up; deleting it"
            );
            self.store.delete_recursive(&root).await?;
        }

        let test_session = Arc::new(TestSession {
            name: session.to_string(),
            cluster_name: cluster_name.clone(),
            shape,
            store: Arc::clone(&self.store),
            ideal_states: Mutex::new(HashMap::new()),
            processes: Mutex::new(HashMap::new()),
        });
        self.sessions
            .lock()
            .await
            .insert(session.to_string(), Arc::clone(&test_session));

        self.admin.add_cluster(&cluster_name, true).await?;
        for instance in self.participant_names(&shape) {
            self.admin.add_instance(&cluster_name, &instance).await?;
        }
        for resource in self.resource_names(&shape) {
            self.admin
                .add_resource(
                    &cluster_name,
                    &resource,
                    shape.partitions_per_resource,
                    self.planner.model(),
                )
                .await?;
            if rebalance {
                self.admin
                    .rebalance(&cluster_name, &resource, shape.replica)
                    .await?;
                if let Some(record) = self
                    .store
                    .read(&keys::ideal_state_path(&cluster_name, &resource))
                    .await?
                {
                    test_session
                        .ideal_states
                        .lock()
                        .await
                        .insert(resource.clone(), record);
                }
            }
        }
        info!(session, cluster = %cluster_name, ?shape, rebalance, "test cluster set up");
        Ok(test_session)
    }

    pub async fn start_participant(&self, session: &str, node_id: u32) -> Result<StartReport, HarnessError> {
        self.start_participants(session, &[node_id]).await
    }

    /// Start a dummy participant per node id. Ids already running are skipped with a warning.
    pub async fn start_participants(
        &self,
        session: &str,
        node_ids: &[u32],
    ) -> Result<StartReport, HarnessError> {
        let names: Vec<String> = node_ids
            .iter()
            .map(|id| self.config.naming.participant_name(*id))
            .collect();
        self.start_processes(session, ProcessKind::Participant, names)
            .await
    }

    /// Start controller 0.
    pub async fn start_controller(&self, session: &str) -> Result<StartReport, HarnessError> {
        self.start_controllers(session, &[0]).await
    }

    pub async fn start_controllers(
        &self,
        session: &str,
        node_ids: &[u32],
    ) -> Result<StartReport, HarnessError> {
        let names: Vec<String> = node_ids
            .iter()
            .map(|id| self.config.naming.controller_name(*id))
            .collect();
        self.start_processes(session, ProcessKind::Controller, names)
            .await
    }

    async fn start_processes(
        &self,
        session: &str,
        kind: ProcessKind,
        names: Vec<String>,
    ) -> Result<StartReport, HarnessError> {
        let test_session = self.session(session).await?;
        let mut report = StartReport::default();
        // Held across spawns so concurrent starts of one name cannot both register.
        let mut processes = test_session.processes.lock().await;
        for name in names {
            if processes.contains_key(&name) {
                warn!(session, %kind, name = %name, "process has already started; skip starting it");
                report.skipped.push(name);
                continue;
            }
            let cluster = &test_session.cluster_name;
            let running = match kind {
                ProcessKind::Participant => {
                    self.factory
                        .start_participant(Arc::clone(&self.store), cluster, &name)
                        .await?
                }
                ProcessKind::Controller => {
                    self.factory
                        .start_controller(
                            Arc::clone(&self.store),
                            cluster,
                            &name,
                            ControllerMode::Standalone,
                        )
                        .await?
                }
            };
            processes.insert(name.clone(), running);
            report.started.push(name);
        }
        Ok(report)
    }

    /// Wait `at`, then block until every resource of the session converges or
    /// the configured timeout elapses.
    pub async fn verify_cluster(&self, session: &str, at: Duration) -> Result<bool, HarnessError> {
        self.verify_cluster_with(session, at, ConvergenceCheck::ExactMatch)
            .await
    }

    pub async fn verify_cluster_with(
        &self,
        session: &str,
        at: Duration,
        check: ConvergenceCheck,
    ) -> Result<bool, HarnessError> {
        tokio::time::sleep(at).await;
        let test_session = self.session(session).await?;
        let clusters: BTreeSet<String> = [test_session.cluster_name.clone()].into_iter().collect();
        let resources: BTreeSet<String> = self
            .resource_names(&test_session.shape)
            .into_iter()
            .collect();
        let verifier =
            ConvergenceVerifier::new(Arc::clone(&self.store), self.config.timing.poll_interval());
        Ok(verifier
            .verify(
                &clusters,
                &resources,
                self.config.timing.verify_timeout(),
                check,
            )
            .await)
    }

    /// Tear the session down: controllers first, then after the settle
    /// interval every remaining process. The session is unregistered.
    pub async fn stop_cluster(&self, session: &str) -> Result<(), HarnessError> {
        let test_session = self
            .sessions
            .lock()
            .await
            .remove(session)
            .ok_or_else(|| HarnessError::SessionNotFound(session.to_string()))?;

        test_session
            .stop_all(self.config.timing.settle_interval())
            .await;
        info!(session, cluster = %test_session.cluster_name, "test cluster stopped");
        Ok(())
    }

    /// Remove a participant from the session now and stop it after `at`.
    ///
    /// A participant that is not running is logged and otherwise ignored.
    pub async fn stop_participant(
        &self,
        session: &str,
        at: Duration,
        node_id: u32,
    ) -> Result<Option<ScheduledBatch>, HarnessError> {
        let test_session = self.session(session).await?;
        let name = self.config.naming.participant_name(node_id);
        let Some(running) = test_session.processes.lock().await.remove(&name) else {
            error!(session, name = %name, "dummy participant seems not running");
            return Ok(None);
        };
        info!(session, name = %name, at_ms = at.as_millis() as u64, "scheduling participant stop");
        Ok(Some(
            self.executor
                .execute_async(vec![TimedCommand::stop(at, running)]),
        ))
    }

    /// Push, after `at`, an ideal state that is `percentage` percent of the way
    /// from an empty `CUSTOMIZED` assignment to a freshly calculated target,
    /// for every resource of the session.
    pub async fn set_ideal_state(
        &self,
        session: &str,
        at: Duration,
        percentage: u32,
    ) -> Result<ScheduledBatch, HarnessError> {
        let test_session = self.session(session).await?;
        if percentage > 100 {
            return Err(HarnessError::InvalidPercentage(percentage));
        }
        let shape = test_session.shape;
        let hosts = self.participant_names(&shape);
        let model = self.planner.model();
        let mut commands = Vec::new();

        for resource in self.resource_names(&shape) {
            let target = self.calculator.calculate(
                &hosts,
                shape.partitions_per_resource,
                shape.replica.saturating_sub(1),
                &resource,
                model.primary(),
                model.secondary(),
            );
            let initial = AssignmentSnapshot::new();
            let total = self.planner.count_required_transitions(&initial, &target)?;
            let steps = steps_for_percentage(total, percentage);
            info!(
                resource = %resource,
                total_steps = total,
                steps,
                percentage,
                "walking toward target ideal state"
            );
            let next = {
                let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
                self.planner
                    .synthesize_intermediate(&initial, &target, steps, &mut *rng)?
            };

            let mut record = Record::ideal_state(
                &resource,
                ideal_state::MODE_CUSTOMIZED,
                shape.partitions_per_resource,
                model.name(),
            );
            record.set_assignment(next);
            test_session
                .ideal_states
                .lock()
                .await
                .insert(resource.clone(), record.clone());
            commands.push(TimedCommand::modify(
                at,
                keys::ideal_state_path(&test_session.cluster_name, &resource),
                WriteMode::Merge,
                record,
            ));
        }
        Ok(self.executor.execute_async(commands))
    }
}
