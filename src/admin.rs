//! Cluster administration: namespace, instance and resource registration.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::calculator::AssignmentCalculator;
use crate::keys;
use crate::record::{Record, ideal_state};
use crate::state_model::StateModel;
use crate::store::{CoordinationStore, StoreError, WriteMode};

#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Create the cluster namespace. With `overwrite`, an existing namespace is removed first.
    async fn add_cluster(&self, cluster: &str, overwrite: bool) -> Result<(), StoreError>;

    async fn add_instance(&self, cluster: &str, instance: &str) -> Result<(), StoreError>;

    /// Register a resource with an empty `AUTO` ideal state.
    async fn add_resource(
        &self,
        cluster: &str,
        resource: &str,
        partitions: u32,
        state_model: &StateModel,
    ) -> Result<(), StoreError>;

    /// Fill the resource's ideal state with a computed assignment of `replica` copies.
    async fn rebalance(&self, cluster: &str, resource: &str, replica: u32) -> Result<(), StoreError>;
}

/// Cluster admin writing straight into a coordination store.
pub struct StoreClusterAdmin {
    store: Arc<dyn CoordinationStore>,
    calculator: Arc<dyn AssignmentCalculator>,
    model: StateModel,
}

impl StoreClusterAdmin {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        calculator: Arc<dyn AssignmentCalculator>,
        model: StateModel,
    ) -> Self {
        Self {
            store,
            calculator,
            model,
        }
    }
}

#[async_trait]
impl ClusterAdmin for StoreClusterAdmin {
    async fn add_cluster(&self, cluster: &str, overwrite: bool) -> Result<(), StoreError> {
        let root = keys::cluster_root(cluster);
        if overwrite && self.store.exists(&root).await? {
            self.store.delete_recursive(&root).await?;
        }
        self.store
            .write(&root, &Record::new(cluster), WriteMode::Replace)
            .await?;
        info!(cluster, "cluster added");
        Ok(())
    }

    async fn add_instance(&self, cluster: &str, instance: &str) -> Result<(), StoreError> {
        self.store
            .write(
                &keys::instance_config_path(cluster, instance),
                &Record::new(instance),
                WriteMode::Replace,
            )
            .await
    }

    async fn add_resource(
        &self,
        cluster: &str,
        resource: &str,
        partitions: u32,
        state_model: &StateModel,
    ) -> Result<(), StoreError> {
        let record = Record::ideal_state(
            resource,
            ideal_state::MODE_AUTO,
            partitions,
            state_model.name(),
        );
        self.store
            .write(
                &keys::ideal_state_path(cluster, resource),
                &record,
                WriteMode::Replace,
            )
            .await
    }

    async fn rebalance(&self, cluster: &str, resource: &str, replica: u32) -> Result<(), StoreError> {
        let path = keys::ideal_state_path(cluster, resource);
        let mut record = self
            .store
            .read(&path)
            .await?
            .ok_or_else(|| StoreError::BackendError(format!("resource {resource} not found")))?;
        let partitions = record
            .simple_field(ideal_state::NUM_PARTITIONS)
            .and_then(|p| p.parse::<u32>().ok())
            .unwrap_or(0);
        let hosts = self
            .store
            .children(&keys::instance_configs_prefix(cluster))
            .await?;
        let assignment = self.calculator.calculate(
            &hosts,
            partitions,
            replica.saturating_sub(1),
            resource,
            self.model.primary(),
            self.model.secondary(),
        );
        record.set_assignment(assignment);
        record.set_simple_field(ideal_state::REPLICAS, replica.to_string());
        self.store.write(&path, &record, WriteMode::Replace).await?;
        info!(cluster, resource, replica, hosts = hosts.len(), partitions, "resource rebalanced");
        Ok(())
    }
}
