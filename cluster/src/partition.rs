//! Partition and PartitionGroup model (§3): the logical units of replication a primitive is
//! hosted in, and the typed voter/passive/reserve configuration attached to each.

use std::collections::BTreeMap;

use atomix_raft::NodeId;
use serde::Deserialize;
use serde::Serialize;

/// The name of a partition group, e.g. `"raft"` or `"management"` (§6: "The management group is
/// a mandatory Raft group of size ≥ 1 used for session-id allocation and primitive metadata.").
pub type GroupName = String;

/// Identifies a single partition within a group.
pub type PartitionId = u32;

/// The role a member plays within a partition's configuration (§3 PartitionReplica).
///
/// Distinct from `atomix_raft::State` (a replica's current *runtime* role, which changes as Raft
/// runs): this is the *configured* role, set by the partition group's membership and changed only
/// by a committed `ConfigurationEntry` (§4.2 "Role promotions (reserve→passive→active)").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MemberRole {
    /// Participates in elections and commit quorums.
    Active,
    /// Replicates the log without voting.
    Passive,
    /// Neither replicates nor votes; a pool of standby capacity awaiting promotion.
    Reserve,
}

/// One member of a partition's configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionMember {
    pub node: NodeId,
    pub role: MemberRole,
}

/// A single partition's static membership: the bounded subset of the cluster hosting its replica
/// set, with `partitionSize` active voters (§3 Partition).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub id: PartitionId,
    pub members: Vec<PartitionMember>,
}

impl PartitionConfig {
    pub fn voters(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().filter(|m| m.role == MemberRole::Active).map(|m| m.node)
    }

    /// Members in the order a client should rotate through on `NotLeader`/timeout (§4.5 step 3):
    /// voters first (only they can ever be leader), then passive members as a fallback read path.
    pub fn rotation_order(&self) -> Vec<NodeId> {
        let mut ordered: Vec<NodeId> = self.voters().collect();
        ordered.extend(self.members.iter().filter(|m| m.role == MemberRole::Passive).map(|m| m.node));
        ordered
    }
}

/// A named collection of partitions sharing a type and membership scheme (§3 PartitionGroup).
///
/// Invariant upheld by the router, not enforced structurally here: every primitive is hosted in
/// exactly one group (§3), so a given `(primitive, key)` always maps to one `(group, partition)`
/// pair via [`crate::router::PartitionRouter::resolve`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionGroup {
    pub name: GroupName,
    pub group_type: GroupType,
    pub partitions: BTreeMap<PartitionId, PartitionConfig>,
}

/// The replication scheme a partition group uses (§6 config `{type: raft, ...}`).
///
/// Only `Raft` is implemented by this core (§1 scope); the tag exists so the config mapper can
/// reject or route other declared types without this crate needing to know their shapes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    Raft,
}

impl PartitionGroup {
    pub fn new(name: impl Into<GroupName>, partitions: BTreeMap<PartitionId, PartitionConfig>) -> Self {
        Self { name: name.into(), group_type: GroupType::Raft, partitions }
    }

    pub fn partition(&self, id: PartitionId) -> Option<&PartitionConfig> {
        self.partitions.get(&id)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

/// Maps a hashable key to a partition id within a group of `partition_count` partitions (§4.5
/// step 1: "key hash mod N"; "Hash is stable across versions").
///
/// Uses a fixed FNV-1a hash rather than `std::hash::Hash`/`SipHash` precisely because the default
/// hasher is randomized per-process and explicitly not guaranteed stable across Rust versions;
/// routing decisions must be reproducible cluster-wide and across restarts.
pub fn key_to_partition(key: &str, partition_count: usize) -> PartitionId {
    debug_assert!(partition_count > 0, "a partition group must have at least one partition");
    let hash = fnv1a(key.as_bytes());
    (hash % partition_count as u64) as PartitionId
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes.iter().fold(OFFSET_BASIS, |hash, byte| (hash ^ *byte as u64).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_hash_is_stable() {
        assert_eq!(key_to_partition("locks/my-lock", 7), key_to_partition("locks/my-lock", 7));
    }

    #[test]
    fn rotation_order_prefers_voters() {
        let cfg = PartitionConfig {
            id: 0,
            members: vec![
                PartitionMember { node: 1, role: MemberRole::Passive },
                PartitionMember { node: 2, role: MemberRole::Active },
                PartitionMember { node: 3, role: MemberRole::Active },
            ],
        };
        assert_eq!(cfg.rotation_order(), vec![2, 3, 1]);
    }
}
