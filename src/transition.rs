//! Transition arithmetic between two assignment snapshots.

use serde::Deserialize;
use tracing::warn;

use crate::record::AssignmentSnapshot;
use crate::state_model::{Distance, StateModel};

/// How the planner treats a `(partition, host)` whose observed role cannot
/// reach its target role by forward transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Log and leave the pair out of the plan.
    #[default]
    Lenient,
    /// Fail with [`TransitionError::Illegal`].
    Strict,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error(
        "no forward transition for partition {partition} on {host}: {} -> {target}",
        .current.as_deref().unwrap_or("<none>")
    )]
    Illegal {
        partition: String,
        host: String,
        current: Option<String>,
        target: String,
    },
}

/// A `(partition, host)` that has not reached its target role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnfinishedPair {
    pub partition: String,
    pub host: String,
    pub required_transitions: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TransitionPlanner {
    model: StateModel,
    strictness: Strictness,
}

impl TransitionPlanner {
    pub fn new(model: StateModel, strictness: Strictness) -> Self {
        Self { model, strictness }
    }

    pub fn model(&self) -> &StateModel {
        &self.model
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    /// Every `(partition, host)` of `target` whose role in `current` differs
    /// and can be reached by forward transitions.
    pub fn find_unfinished_pairs(
        &self,
        current: &AssignmentSnapshot,
        target: &AssignmentSnapshot,
    ) -> Result<Vec<UnfinishedPair>, TransitionError> {
        let mut pairs = Vec::new();
        for (partition, host, target_role) in target.iter_roles() {
            let observed = current.role(partition, host);
            match self.model.distance(observed, target_role) {
                Distance::Reached => {}
                Distance::Steps(n) => pairs.push(UnfinishedPair {
                    partition: partition.to_string(),
                    host: host.to_string(),
                    required_transitions: n,
                }),
                Distance::Illegal => {
                    if self.strictness == Strictness::Strict {
                        return Err(TransitionError::Illegal {
                            partition: partition.to_string(),
                            host: host.to_string(),
                            current: observed.map(str::to_string),
                            target: target_role.to_string(),
                        });
                    }
                    warn!(
                        partition,
                        host,
                        current = observed.unwrap_or("<none>"),
                        target = target_role,
                        model = %self.model,
                        "skipping pair with no forward transition"
                    );
                }
            }
        }
        Ok(pairs)
    }

    /// Total number of single-role steps from `current` to `target`.
    pub fn count_required_transitions(
        &self,
        current: &AssignmentSnapshot,
        target: &AssignmentSnapshot,
    ) -> Result<u32, TransitionError> {
        Ok(self
            .find_unfinished_pairs(current, target)?
            .iter()
            .map(|p| p.required_transitions)
            .sum())
    }
}
