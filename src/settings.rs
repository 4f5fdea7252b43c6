use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::state_model::StateModel;
use crate::transition::Strictness;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HarnessConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_address")]
    pub address: String, // e.g. memory://local
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: default_store_address(),
        }
    }
}

fn default_store_address() -> String {
    "memory://local".to_string()
}

/// Naming conventions for clusters, resources and processes.
#[derive(Debug, Deserialize, Clone)]
pub struct NamingConfig {
    #[serde(default = "default_cluster_prefix")]
    pub cluster_prefix: String,
    #[serde(default = "default_resource_prefix")]
    pub resource_prefix: String,
    #[serde(default = "default_participant_prefix")]
    pub participant_prefix: String,
    #[serde(default = "default_controller_prefix")]
    pub controller_prefix: String,
    /// Participant `n` is named `{participant_prefix}_{start_port + n}`
    #[serde(default = "default_start_port")]
    pub start_port: u32,
    #[serde(default)]
    pub state_model: StateModelConfig,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            cluster_prefix: default_cluster_prefix(),
            resource_prefix: default_resource_prefix(),
            participant_prefix: default_participant_prefix(),
            controller_prefix: default_controller_prefix(),
            start_port: default_start_port(),
            state_model: StateModelConfig::default(),
        }
    }
}

impl NamingConfig {
    pub fn cluster_name(&self, session: &str) -> String {
        format!("{}_{}", self.cluster_prefix, session)
    }

    pub fn resource_name(&self, index: u32) -> String {
        format!("{}{}", self.resource_prefix, index)
    }

    pub fn participant_name(&self, node_id: u32) -> String {
        format!("{}_{}", self.participant_prefix, self.start_port + node_id)
    }

    pub fn controller_name(&self, node_id: u32) -> String {
        format!("{}_{}", self.controller_prefix, node_id)
    }
}

fn default_cluster_prefix() -> String {
    "TestDriver".to_string()
}

fn default_resource_prefix() -> String {
    "TestDB".to_string()
}

fn default_participant_prefix() -> String {
    "localhost".to_string()
}

fn default_controller_prefix() -> String {
    "controller".to_string()
}

fn default_start_port() -> u32 {
    12918
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateModelConfig {
    #[serde(default = "default_state_model_name")]
    pub name: String,
    #[serde(default = "default_primary_label")]
    pub primary: String,
    #[serde(default = "default_secondary_label")]
    pub secondary: String,
}

impl Default for StateModelConfig {
    fn default() -> Self {
        Self {
            name: default_state_model_name(),
            primary: default_primary_label(),
            secondary: default_secondary_label(),
        }
    }
}

impl StateModelConfig {
    pub fn to_model(&self) -> StateModel {
        StateModel::new(&self.name, &self.primary, &self.secondary)
    }
}

fn default_state_model_name() -> String {
    "MasterSlave".to_string()
}

fn default_primary_label() -> String {
    "MASTER".to_string()
}

fn default_secondary_label() -> String {
    "SLAVE".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimingConfig {
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause between stopping controllers and stopping everything else
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,
    #[serde(default = "default_sim_tick_ms")]
    pub sim_tick_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            verify_timeout_ms: default_verify_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_interval_ms: default_settle_interval_ms(),
            sim_tick_ms: default_sim_tick_ms(),
        }
    }
}

impl TimingConfig {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn sim_tick(&self) -> Duration {
        Duration::from_millis(self.sim_tick_ms)
    }
}

fn default_verify_timeout_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_settle_interval_ms() -> u64 {
    1_000
}

fn default_sim_tick_ms() -> u64 {
    50
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PlannerConfig {
    #[serde(default)]
    pub strictness: Strictness,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl HarnessConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}
