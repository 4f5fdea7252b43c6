//! Coordination-store paths. Every path is a pure function of cluster,
//! resource and instance names.

pub fn cluster_root(cluster: &str) -> String {
    format!("/{}", cluster)
}

pub fn ideal_states_prefix(cluster: &str) -> String {
    format!("/{}/IDEALSTATES", cluster)
}

/// The ideal state (target assignment) of a resource
pub fn ideal_state_path(cluster: &str, resource: &str) -> String {
    format!("{}/{}", ideal_states_prefix(cluster), resource)
}

pub fn external_views_prefix(cluster: &str) -> String {
    format!("/{}/EXTERNALVIEW", cluster)
}

/// The external view (observed assignment) of a resource
pub fn external_view_path(cluster: &str, resource: &str) -> String {
    format!("{}/{}", external_views_prefix(cluster), resource)
}

pub fn live_instances_prefix(cluster: &str) -> String {
    format!("/{}/LIVEINSTANCES", cluster)
}

pub fn live_instance_path(cluster: &str, instance: &str) -> String {
    format!("{}/{}", live_instances_prefix(cluster), instance)
}

pub fn instance_configs_prefix(cluster: &str) -> String {
    format!("/{}/CONFIGS/PARTICIPANT", cluster)
}

pub fn instance_config_path(cluster: &str, instance: &str) -> String {
    format!("{}/{}", instance_configs_prefix(cluster), instance)
}

/// Roles a participant currently holds for one resource
pub fn current_state_path(cluster: &str, instance: &str, resource: &str) -> String {
    format!("/{}/INSTANCES/{}/CURRENTSTATES/{}", cluster, instance, resource)
}

pub fn controller_leader_path(cluster: &str) -> String {
    format!("/{}/CONTROLLER/LEADER", cluster)
}
