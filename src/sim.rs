//! Simulated cluster members.
//!
//! A dummy participant walks its replicas one legal step per tick toward the
//! ideal state and publishes what it holds as its current state. A standalone
//! controller folds the current states of all live participants into each
//! resource's external view. Both stop acting as soon as they disconnect.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::keys;
use crate::process::{
    ClusterProcess, ControllerMode, ProcessError, ProcessFactory, ProcessKind, RunningProcess,
};
use crate::record::{AssignmentSnapshot, Record};
use crate::state_model::StateModel;
use crate::store::{CoordinationStore, StoreError, WriteMode};

/// Connection state shared between a member handle and its background loop.
struct Membership {
    store: Arc<dyn CoordinationStore>,
    cluster: String,
    name: String,
    kind: ProcessKind,
    connected: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl Membership {
    fn new(
        store: Arc<dyn CoordinationStore>,
        cluster: &str,
        name: &str,
        kind: ProcessKind,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let me = Arc::new(Self {
            store,
            cluster: cluster.to_string(),
            name: name.to_string(),
            kind,
            connected: AtomicBool::new(true),
            shutdown_tx,
        });
        (me, shutdown_rx)
    }

    /// Path of the record that announces this member while it is connected.
    fn presence_path(&self) -> String {
        match self.kind {
            ProcessKind::Participant => keys::live_instance_path(&self.cluster, &self.name),
            ProcessKind::Controller => keys::controller_leader_path(&self.cluster),
        }
    }

    /// Write the presence record, refusing if another member already holds it.
    async fn announce(&self, record: &Record) -> Result<(), ProcessError> {
        let path = self.presence_path();
        if self.store.exists(&path).await? {
            return Err(ProcessError::StartFailed {
                kind: self.kind,
                name: self.name.clone(),
                reason: format!("{path} is already held"),
            });
        }
        self.store.write(&path, record, WriteMode::Replace).await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterProcess for Membership {
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
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.store.delete_recursive(&self.presence_path()).await {
            warn!(name = %self.name, error = %e, "failed to remove presence record");
        }
        info!(name = %self.name, kind = %self.kind, cluster = %self.cluster, "disconnected");
    }
}

/// Spawns dummy participants and standalone controllers.
#[derive(Debug, Clone)]
pub struct SimProcessFactory {
    model: StateModel,
    tick: Duration,
}

impl SimProcessFactory {
    pub fn new(model: StateModel, tick: Duration) -> Self {
        Self { model, tick }
    }
}

#[async_trait]
impl ProcessFactory for SimProcessFactory {
    async fn start_participant(
        &self,
        store: Arc<dyn CoordinationStore>,
        cluster: &str,
        instance: &str,
    ) -> Result<RunningProcess, ProcessError> {
        let (member, shutdown_rx) =
            Membership::new(Arc::clone(&store), cluster, instance, ProcessKind::Participant);
        member.announce(&Record::new(instance)).await?;
        info!(cluster, instance, store = %store.address(), "participant started");

        let model = self.model.clone();
        let tick = self.tick;
        let bg = Arc::clone(&member);
        let task = tokio::spawn(async move {
            run_loop(tick, shutdown_rx, || participant_tick(&bg, &model)).await;
        });
        Ok(RunningProcess::new(member, task))
    }

    async fn start_controller(
        &self,
        store: Arc<dyn CoordinationStore>,
        cluster: &str,
        name: &str,
        mode: ControllerMode,
    ) -> Result<RunningProcess, ProcessError> {
        let (member, shutdown_rx) =
            Membership::new(Arc::clone(&store), cluster, name, ProcessKind::Controller);
        let mut leader = Record::new(name);
        leader.set_simple_field("MODE", format!("{mode:?}").to_uppercase());
        member.announce(&leader).await?;
        info!(cluster, name, ?mode, "controller started");

        let tick = self.tick;
        let bg = Arc::clone(&member);
        let task = tokio::spawn(async move {
            run_loop(tick, shutdown_rx, || controller_tick(&bg)).await;
        });
        Ok(RunningProcess::new(member, task))
    }
}

async fn run_loop<F, Fut>(tick: Duration, mut shutdown_rx: watch::Receiver<bool>, mut step: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), StoreError>>,
{
    let mut interval = tokio::time::interval(tick);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if *shutdown_rx.borrow() { break; }
                if let Err(e) = step().await {
                    debug!(error = %e, "simulation tick failed; retrying next tick");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() { break; }
            }
        }
    }
}

/// Advance every replica this participant should hold by one step and
/// publish the resulting current state per resource.
async fn participant_tick(member: &Membership, model: &StateModel) -> Result<(), StoreError> {
    let resources = member
        .store
        .children(&keys::ideal_states_prefix(&member.cluster))
        .await?;
    for resource in resources {
        if !member.is_connected() {
            return Ok(());
        }
        let Some(ideal) = member
            .store
            .read(&keys::ideal_state_path(&member.cluster, &resource))
            .await?
        else {
            continue;
        };
        let path = keys::current_state_path(&member.cluster, &member.name, &resource);
        let held = member
            .store
            .read(&path)
            .await?
            .map(|r| r.assignment())
            .unwrap_or_default();

        let ideal = ideal.assignment();
        let next = advance_replicas(model, &member.name, &held, &ideal);
        if next != held {
            let mut record = Record::new(resource.as_str());
            record.set_assignment(next);
            member.store.write(&path, &record, WriteMode::Replace).await?;
        }
    }
    Ok(())
}

/// One simulated state-machine round for `host`: forward steps toward the
/// ideal role, and replicas the ideal state no longer gives this host (or
/// demotes) are dropped.
fn advance_replicas(
    model: &StateModel,
    host: &str,
    held: &AssignmentSnapshot,
    ideal: &AssignmentSnapshot,
) -> AssignmentSnapshot {
    let mut next = AssignmentSnapshot::new();
    for (partition, h, target) in ideal.iter_roles() {
        if h != host {
            continue;
        }
        let current = held.role(partition, host);
        match model.next_step(current, target) {
            Some(stepped) if stepped.eq_ignore_ascii_case(target) => {
                next.set_role(partition, host, target)
            }
            Some(stepped) => next.set_role(partition, host, stepped),
            None => {
                if current.is_some_and(|c| c.eq_ignore_ascii_case(target)) {
                    next.set_role(partition, host, target);
                }
            }
        }
    }
    next
}

/// Rebuild every resource's external view from the current states of live participants.
async fn controller_tick(member: &Membership) -> Result<(), StoreError> {
    let cluster = &member.cluster;
    let live: BTreeSet<String> = member
        .store
        .children(&keys::live_instances_prefix(cluster))
        .await?
        .into_iter()
        .collect();
    let resources = member
        .store
        .children(&keys::ideal_states_prefix(cluster))
        .await?;
    for resource in resources {
        if !member.is_connected() {
            return Ok(());
        }
        let mut view = AssignmentSnapshot::new();
        for instance in &live {
            let path = keys::current_state_path(cluster, instance, &resource);
            if let Some(state) = member.store.read(&path).await? {
                for (partition, host, role) in state.assignment().iter_roles() {
                    if host == instance {
                        view.set_role(partition, host, role);
                    }
                }
            }
        }

        let path = keys::external_view_path(cluster, &resource);
        let existing = member.store.read(&path).await?.map(|r| r.assignment());
        if existing.as_ref() != Some(&view) {
            let mut record = Record::new(resource.as_str());
            record.set_assignment(view);
            member.store.write(&path, &record, WriteMode::Replace).await?;
        }
    }
    Ok(())
}
