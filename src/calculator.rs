//! Target assignment calculation.

use crate::record::AssignmentSnapshot;

/// Computes a target layout from placement constraints.
pub trait AssignmentCalculator: Send + Sync {
    /// Assign every partition of `resource` one `primary` host and
    /// `extra_replicas` `secondary` hosts drawn from `hosts`.
    fn calculate(
        &self,
        hosts: &[String],
        partitions: u32,
        extra_replicas: u32,
        resource: &str,
        primary: &str,
        secondary: &str,
    ) -> AssignmentSnapshot;
}

/// Partition name used in ideal states and external views.
pub fn partition_name(resource: &str, partition: u32) -> String {
    format!("{}_{}", resource, partition)
}

/// Rendezvous-hashing placement.
///
/// Hosts are ranked per partition by a hash of `(host, partition)`; the
/// best-ranked host is primary and the following ones are secondaries. The
/// result only depends on the inputs, so recomputing it is stable.
#[derive(Debug, Clone, Copy, Default)]
pub struct RendezvousCalculator;

impl AssignmentCalculator for RendezvousCalculator {
    fn calculate(
        &self,
        hosts: &[String],
        partitions: u32,
        extra_replicas: u32,
        resource: &str,
        primary: &str,
        secondary: &str,
    ) -> AssignmentSnapshot {
        let mut assignment = AssignmentSnapshot::new();
        let replicas = (extra_replicas as usize + 1).min(hosts.len());
        for p in 0..partitions {
            let partition = partition_name(resource, p);
            let partition_hash = fnv1a64(partition.as_bytes());
            let mut ranked: Vec<(u64, &String)> = hosts
                .iter()
                .map(|h| (mix64(fnv1a64(h.as_bytes()) ^ partition_hash), h))
                .collect();
            ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
            for (rank, (_, host)) in ranked.into_iter().take(replicas).enumerate() {
                let role = if rank == 0 { primary } else { secondary };
                assignment.set_role(partition.clone(), host.as_str(), role);
            }
        }
        assignment
    }
}

fn fnv1a64(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001B3;
    let mut hash = FNV_OFFSET;
    for b in data {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}
