//! Persisted record model and assignment snapshots.
//!
//! A [`Record`] is the unit stored at a coordination-store path: simple
//! string fields, map fields (`key -> (key -> value)`) and list fields.
//! Ideal states and external views keep their partition layout in the map
//! fields, which is what [`AssignmentSnapshot`] views.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Simple-field names used on ideal-state records.
pub mod ideal_state {
    pub const IDEAL_STATE_MODE: &str = "IDEAL_STATE_MODE";
    pub const NUM_PARTITIONS: &str = "NUM_PARTITIONS";
    pub const STATE_MODEL_DEF_REF: &str = "STATE_MODEL_DEF_REF";
    pub const REPLICAS: &str = "REPLICAS";

    /// The controller computes placement from constraints.
    pub const MODE_AUTO: &str = "AUTO";
    /// Placement is dictated verbatim by the map fields.
    pub const MODE_CUSTOMIZED: &str = "CUSTOMIZED";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub simple_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub map_fields: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub list_fields: BTreeMap<String, Vec<String>>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn simple_field(&self, key: &str) -> Option<&str> {
        self.simple_fields.get(key).map(String::as_str)
    }

    pub fn set_simple_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.simple_fields.insert(key.into(), value.into());
    }

    /// Build an ideal-state record with the standard simple fields filled in.
    pub fn ideal_state(
        resource: &str,
        mode: &str,
        num_partitions: u32,
        state_model: &str,
    ) -> Self {
        let mut record = Self::new(resource);
        record.set_simple_field(ideal_state::IDEAL_STATE_MODE, mode);
        record.set_simple_field(ideal_state::NUM_PARTITIONS, num_partitions.to_string());
        record.set_simple_field(ideal_state::STATE_MODEL_DEF_REF, state_model);
        record
    }

    /// Copy of the partition layout held in the map fields.
    pub fn assignment(&self) -> AssignmentSnapshot {
        AssignmentSnapshot(self.map_fields.clone())
    }

    pub fn set_assignment(&mut self, assignment: AssignmentSnapshot) {
        self.map_fields = assignment.0;
    }

    /// Merge `other` into `self`: simple fields overwrite, map fields merge
    /// per inner key, list fields append. The id of `self` is kept.
    pub fn merge(&mut self, other: &Record) {
        for (k, v) in &other.simple_fields {
            self.simple_fields.insert(k.clone(), v.clone());
        }
        for (k, inner) in &other.map_fields {
            let target = self.map_fields.entry(k.clone()).or_default();
            for (ik, iv) in inner {
                target.insert(ik.clone(), iv.clone());
            }
        }
        for (k, list) in &other.list_fields {
            self.list_fields
                .entry(k.clone())
                .or_default()
                .extend(list.iter().cloned());
        }
    }
}

/// Partition -> host -> role label.
///
/// Snapshots are plain owned values; cloning one never shares state with the original.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentSnapshot(BTreeMap<String, BTreeMap<String, String>>);

impl AssignmentSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(&self, partition: &str, host: &str) -> Option<&str> {
        self.0
            .get(partition)
            .and_then(|hosts| hosts.get(host))
            .map(String::as_str)
    }

    pub fn set_role(
        &mut self,
        partition: impl Into<String>,
        host: impl Into<String>,
        role: impl Into<String>,
    ) {
        self.0
            .entry(partition.into())
            .or_default()
            .insert(host.into(), role.into());
    }

    /// Remove a host's role for a partition, dropping the partition if it becomes empty.
    pub fn remove_role(&mut self, partition: &str, host: &str) -> Option<String> {
        let hosts = self.0.get_mut(partition)?;
        let removed = hosts.remove(host);
        if hosts.is_empty() {
            self.0.remove(partition);
        }
        removed
    }

    pub fn partitions(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn hosts_for(&self, partition: &str) -> Option<&BTreeMap<String, String>> {
        self.0.get(partition)
    }

    /// Iterate `(partition, host, role)` triples in key order.
    pub fn iter_roles(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.0.iter().flat_map(|(partition, hosts)| {
            hosts
                .iter()
                .map(move |(host, role)| (partition.as_str(), host.as_str(), role.as_str()))
        })
    }

    /// Number of `(partition, host)` entries.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy keeping only the given hosts; partitions left without hosts are dropped.
    pub fn restricted_to_hosts(&self, hosts: &BTreeSet<String>) -> Self {
        let mut out = Self::new();
        for (partition, host, role) in self.iter_roles() {
            if hosts.contains(host) {
                out.set_role(partition, host, role);
            }
        }
        out
    }

    /// Number of `(partition, host)` entries of `target` whose role here equals
    /// the target role (ASCII case-insensitive).
    pub fn matching_roles(&self, target: &AssignmentSnapshot) -> usize {
        target
            .iter_roles()
            .filter(|(p, h, role)| {
                self.role(p, h)
                    .is_some_and(|current| current.eq_ignore_ascii_case(role))
            })
            .count()
    }
}

impl From<BTreeMap<String, BTreeMap<String, String>>> for AssignmentSnapshot {
    fn from(map: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self(map)
    }
}

impl<P, H, R> FromIterator<(P, H, R)> for AssignmentSnapshot
where
    P: Into<String>,
    H: Into<String>,
    R: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (P, H, R)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (p, h, r) in iter {
            snapshot.set_role(p, h, r);
        }
        snapshot
    }
}
