//! Cluster member processes and the factory that spawns them.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::store::{CoordinationStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Controller,
    Participant,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::Controller => write!(f, "controller"),
            ProcessKind::Participant => write!(f, "participant"),
        }
    }
}

/// How a controller is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerMode {
    /// A single controller process managing one cluster.
    #[default]
    Standalone,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {kind} {name}: {reason}")]
    StartFailed {
        kind: ProcessKind,
        name: String,
        reason: String,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// The logical side of a running cluster member.
#[async_trait]
pub trait ClusterProcess: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProcessKind;

    fn is_connected(&self) -> bool;

    /// Leave the cluster gracefully. Must be safe to call more than once.
    async fn disconnect(&self);
}

/// A spawned member: its logical handle plus the task driving it.
pub struct RunningProcess {
    pub process: Arc<dyn ClusterProcess>,
    pub task: JoinHandle<()>,
}

impl RunningProcess {
    pub fn new(process: Arc<dyn ClusterProcess>, task: JoinHandle<()>) -> Self {
        Self { process, task }
    }

    pub fn name(&self) -> &str {
        self.process.name()
    }

    pub fn kind(&self) -> ProcessKind {
        self.process.kind()
    }

    /// Disconnect, then abort the driving task. Does not wait for the task to finish.
    pub async fn stop(self) {
        debug!(name = %self.process.name(), kind = %self.process.kind(), "stopping process");
        self.process.disconnect().await;
        self.task.abort();
    }
}

impl fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningProcess")
            .field("name", &self.process.name())
            .field("kind", &self.process.kind())
            .field("connected", &self.process.is_connected())
            .finish()
    }
}

/// Spawns participants and controllers bound to a cluster in a store.
#[async_trait]
pub trait ProcessFactory: Send + Sync {
    async fn start_participant(
        &self,
        store: Arc<dyn CoordinationStore>,
        cluster: &str,
        instance: &str,
    ) -> Result<RunningProcess, ProcessError>;

    async fn start_controller(
        &self,
        store: Arc<dyn CoordinationStore>,
        cluster: &str,
        name: &str,
        mode: ControllerMode,
    ) -> Result<RunningProcess, ProcessError>;
}
