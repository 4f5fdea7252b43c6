//! Convergence verification: poll external views against ideal states.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::keys;
use crate::record::Record;
use crate::store::{CoordinationStore, StoreError};

/// Everything a convergence check may look at for one `(cluster, resource)`.
#[derive(Debug, Clone)]
pub struct ResourceView {
    pub cluster: String,
    pub resource: String,
    pub ideal_state: Option<Record>,
    pub external_view: Option<Record>,
    pub live_instances: BTreeSet<String>,
}

/// Built-in convergence checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConvergenceCheck {
    /// External view assignment equals the ideal-state assignment.
    #[default]
    ExactMatch,
    /// External view equals the ideal state restricted to live instances.
    LiveInstancesMatch,
}

impl ConvergenceCheck {
    pub fn holds(&self, view: &ResourceView) -> bool {
        let (Some(ideal), Some(external)) = (&view.ideal_state, &view.external_view) else {
            return false;
        };
        let ideal = ideal.assignment();
        let external = external.assignment();
        match self {
            ConvergenceCheck::ExactMatch => ideal == external,
            ConvergenceCheck::LiveInstancesMatch => {
                ideal.restricted_to_hosts(&view.live_instances) == external
            }
        }
    }
}

pub struct ConvergenceVerifier {
    store: Arc<dyn CoordinationStore>,
    poll_interval: Duration,
}

impl ConvergenceVerifier {
    pub fn new(store: Arc<dyn CoordinationStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Wait until every `(cluster, resource)` pair satisfies `check`, or `timeout` elapses.
    /// Returns true if converged, false if timed out.
    pub async fn verify(
        &self,
        clusters: &BTreeSet<String>,
        resources: &BTreeSet<String>,
        timeout: Duration,
        check: ConvergenceCheck,
    ) -> bool {
        self.verify_with(clusters, resources, timeout, |view| check.holds(view))
            .await
    }

    /// Like [`verify`](Self::verify) with a caller-supplied predicate.
    ///
    /// Uses `tokio::time::Instant` so paused test clocks are honored.
    pub async fn verify_with<P>(
        &self,
        clusters: &BTreeSet<String>,
        resources: &BTreeSet<String>,
        timeout: Duration,
        predicate: P,
    ) -> bool
    where
        P: Fn(&ResourceView) -> bool,
    {
        let start = tokio::time::Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            // A stalled store must not outlive the deadline.
            let remaining = timeout.saturating_sub(start.elapsed());
            let poll = tokio::time::timeout(
                remaining,
                self.pending_pairs(clusters, resources, &predicate),
            )
            .await;
            let Ok(poll) = poll else {
                warn!(attempts, "verify: timed out waiting on the store");
                return false;
            };
            match poll {
                Ok(pending) if pending.is_empty() => {
                    info!(
                        attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "cluster converged"
                    );
                    return true;
                }
                Ok(pending) => {
                    if start.elapsed() >= timeout {
                        warn!(attempts, pending = ?pending, "verify: timed out");
                        return false;
                    }
                    debug!(attempts, pending = pending.len(), "not converged yet");
                }
                Err(e) => {
                    if start.elapsed() >= timeout {
                        warn!(attempts, error = %e, "verify: timed out on store error");
                        return false;
                    }
                    debug!(attempts, error = %e, "store read failed; retrying");
                }
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }

    /// Pairs that do not satisfy the predicate yet.
    async fn pending_pairs<P>(
        &self,
        clusters: &BTreeSet<String>,
        resources: &BTreeSet<String>,
        predicate: &P,
    ) -> Result<Vec<(String, String)>, StoreError>
    where
        P: Fn(&ResourceView) -> bool,
    {
        let mut pending = Vec::new();
        for cluster in clusters {
            let live_instances: BTreeSet<String> = self
                .store
                .children(&keys::live_instances_prefix(cluster))
                .await?
                .into_iter()
                .collect();
            for resource in resources {
                let view = ResourceView {
                    cluster: cluster.clone(),
                    resource: resource.clone(),
                    ideal_state: self
                        .store
                        .read(&keys::ideal_state_path(cluster, resource))
                        .await?,
                    external_view: self
                        .store
                        .read(&keys::external_view_path(cluster, resource))
                        .await?,
                    live_instances: live_instances.clone(),
                };
                if !predicate(&view) {
                    pending.push((cluster.clone(), resource.clone()));
                }
            }
        }
        Ok(pending)
    }
}
