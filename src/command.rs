//! Timed fault-injection commands and their executor.
//!
//! Every command in a batch runs in its own task and fires once its own
//! trigger delay has elapsed. A failing command is logged and never affects
//! the rest of the batch. Submitting a batch does not block.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::process::RunningProcess;
use crate::record::Record;
use crate::store::{CoordinationStore, WriteMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    ModifyRecord,
    StopProcess,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::ModifyRecord => write!(f, "MODIFY"),
            CommandKind::StopProcess => write!(f, "STOP"),
        }
    }
}

#[derive(Debug)]
pub enum CommandOperand {
    Record {
        path: String,
        mode: WriteMode,
        value: Record,
    },
    Process(RunningProcess),
}

#[derive(Debug)]
pub struct TimedCommand {
    pub trigger: Duration,
    pub operand: CommandOperand,
}

impl TimedCommand {
    pub fn modify(trigger: Duration, path: impl Into<String>, mode: WriteMode, value: Record) -> Self {
        Self {
            trigger,
            operand: CommandOperand::Record {
                path: path.into(),
                mode,
                value,
            },
        }
    }

    pub fn stop(trigger: Duration, process: RunningProcess) -> Self {
        Self {
            trigger,
            operand: CommandOperand::Process(process),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self.operand {
            CommandOperand::Record { .. } => CommandKind::ModifyRecord,
            CommandOperand::Process(_) => CommandKind::StopProcess,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Handle to one scheduled command.
#[derive(Debug)]
pub struct CommandTicket {
    pub kind: CommandKind,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<CommandOutcome>,
}

impl CommandTicket {
    /// Prevent the command from firing if its delay has not elapsed yet.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub async fn outcome(self) -> CommandOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => CommandOutcome::Failed(format!("command task failed: {e}")),
        }
    }
}

/// The tickets of one submitted batch. Dropping it leaves the commands running.
#[derive(Debug)]
pub struct ScheduledBatch {
    pub tickets: Vec<CommandTicket>,
}

impl ScheduledBatch {
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Wait for every command of the batch, in submission order.
    pub async fn outcomes(self) -> Vec<CommandOutcome> {
        let mut out = Vec::with_capacity(self.tickets.len());
        for ticket in self.tickets {
            out.push(ticket.outcome().await);
        }
        out
    }
}

#[derive(Clone)]
pub struct CommandExecutor {
    store: Arc<dyn CoordinationStore>,
}

impl CommandExecutor {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Schedule every command of the batch and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute_async(&self, commands: Vec<TimedCommand>) -> ScheduledBatch {
        let tickets = commands
            .into_iter()
            .map(|command| {
                let kind = command.kind();
                let (cancel, cancel_rx) = watch::channel(false);
                let store = Arc::clone(&self.store);
                let handle = tokio::spawn(run_command(store, command, cancel_rx));
                CommandTicket {
                    kind,
                    cancel,
                    handle,
                }
            })
            .collect();
        ScheduledBatch { tickets }
    }
}

/// Sleep until `trigger` elapses. Returns false if cancelled first.
async fn wait_for_trigger(trigger: Duration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(trigger);
    tokio::pin!(sleep);
    loop {
        if *cancel_rx.borrow() {
            return false;
        }
        tokio::select! {
            _ = &mut sleep => return true,
            changed = cancel_rx.changed() => {
                if changed.is_err() {
                    // Ticket dropped: nobody can cancel any more.
                    (&mut sleep).await;
                    return true;
                }
            }
        }
    }
}

async fn run_command(
    store: Arc<dyn CoordinationStore>,
    command: TimedCommand,
    mut cancel_rx: watch::Receiver<bool>,
) -> CommandOutcome {
    let kind = command.kind();
    if !wait_for_trigger(command.trigger, &mut cancel_rx).await {
        info!(%kind, trigger_ms = command.trigger.as_millis() as u64, "command cancelled before firing");
        return CommandOutcome::Cancelled;
    }

    match command.operand {
        CommandOperand::Record { path, mode, value } => {
            match store.write(&path, &value, mode).await {
                Ok(()) => {
                    info!(%kind, path = %path, ?mode, store = %store.address(), "command fired");
                    CommandOutcome::Completed
                }
                Err(e) => {
                    error!(%kind, path = %path, error = %e, "command failed");
                    CommandOutcome::Failed(e.to_string())
                }
            }
        }
        CommandOperand::Process(process) => {
            let name = process.name().to_string();
            if !process.process.is_connected() {
                warn!(%kind, name = %name, "process already disconnected; stopping task anyway");
            }
            process.stop().await;
            info!(%kind, name = %name, "command fired");
            CommandOutcome::Completed
        }
    }
}
