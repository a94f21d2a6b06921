//! Membership glue (§4.7, DESIGN NOTES): folds an external discovery provider's event stream into
//! the fixed voter set a Raft partition needs, honoring the "only single-server add/remove per
//! committed configuration entry" constraint (§4.2).

use std::collections::BTreeSet;
use std::sync::Arc;

use atomix_raft::NodeId;
use atomix_raft::Raft;
use atomix_raft::RaftNetwork;
use atomix_raft::RaftStorage;
use atomix_raft::ResponseError;
use tokio::sync::mpsc;

use crate::partition::PartitionConfig;

/// A discovery event, as produced by the external discovery provider this core treats as advisory
/// input (§6 "Discovery contract consumed").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiscoveryEvent {
    Join(NodeId),
    Leave(NodeId),
}

/// Folds a stream of [`DiscoveryEvent`]s into single-server `add_non_voter`/`change_membership`
/// calls against a partition's Raft handle, one change at a time.
///
/// Raft voter sets remain governed entirely by committed configuration entries (§6): this watcher
/// only ever *proposes* a change in response to membership churn it observes; whether the change
/// actually lands is still gated by the partition's own joint-consensus machinery (a change in
/// progress causes a later proposal to be rejected and retried on the next event, not queued).
pub struct MembershipWatcher {
    events: mpsc::Receiver<DiscoveryEvent>,
}

impl MembershipWatcher {
    pub fn new(events: mpsc::Receiver<DiscoveryEvent>) -> Self {
        Self { events }
    }

    /// Drive the watcher against `raft`'s current configured voters until the event channel
    /// closes. `configured` seeds the watcher's view of the partition's intended voter set
    /// (distinct from Raft's own runtime membership, which a single-server add only updates
    /// incrementally); in steady state it should mirror `partition.voters()`.
    pub async fn run<D, R, N, S>(mut self, raft: Raft<D, R, N, S>, mut configured: BTreeSet<NodeId>)
    where
        D: atomix_raft::AppData,
        R: atomix_raft::AppDataResponse,
        N: RaftNetwork<D>,
        S: RaftStorage<D, R>,
    {
        while let Some(event) = self.events.recv().await {
            match event {
                DiscoveryEvent::Join(node) => {
                    if configured.contains(&node) {
                        continue;
                    }
                    if let Err(err) = self.apply_join(&raft, &mut configured, node).await {
                        tracing::warn!(node, error = %err, "deferring membership add until configuration change is unblocked");
                    }
                }
                DiscoveryEvent::Leave(node) => {
                    if !configured.contains(&node) {
                        continue;
                    }
                    if let Err(err) = self.apply_leave(&raft, &mut configured, node).await {
                        tracing::warn!(node, error = %err, "deferring membership remove until configuration change is unblocked");
                    }
                }
            }
        }
    }

    async fn apply_join<D, R, N, S>(
        &self,
        raft: &Raft<D, R, N, S>,
        configured: &mut BTreeSet<NodeId>,
        node: NodeId,
    ) -> Result<(), ResponseError>
    where
        D: atomix_raft::AppData,
        R: atomix_raft::AppDataResponse,
        N: RaftNetwork<D>,
        S: RaftStorage<D, R>,
    {
        raft.add_non_voter(node).await?;
        let mut next = configured.clone();
        next.insert(node);
        raft.change_membership(next.clone()).await?;
        *configured = next;
        Ok(())
    }

    async fn apply_leave<D, R, N, S>(
        &self,
        raft: &Raft<D, R, N, S>,
        configured: &mut BTreeSet<NodeId>,
        node: NodeId,
    ) -> Result<(), ResponseError>
    where
        D: atomix_raft::AppData,
        R: atomix_raft::AppDataResponse,
        N: RaftNetwork<D>,
        S: RaftStorage<D, R>,
    {
        let mut next = configured.clone();
        next.remove(&node);
        raft.change_membership(next.clone()).await?;
        *configured = next;
        Ok(())
    }
}

/// Derive the voter set a freshly joined partition replica should `add_non_voter`/
/// `change_membership` towards from its static [`PartitionConfig`] (used at partition bootstrap,
/// before any discovery events have been observed).
pub fn initial_voters(config: &PartitionConfig) -> BTreeSet<NodeId> {
    config.voters().collect()
}

/// An in-memory [`DiscoveryEvent`] source for tests, paired with a sender the test drives.
pub fn test_discovery_channel() -> (mpsc::Sender<DiscoveryEvent>, MembershipWatcher) {
    let (tx, rx) = mpsc::channel(64);
    (tx, MembershipWatcher::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_voters_excludes_passive_and_reserve() {
        use crate::partition::MemberRole;
        use crate::partition::PartitionMember;

        let config = PartitionConfig {
            id: 0,
            members: vec![
                PartitionMember { node: 1, role: MemberRole::Active },
                PartitionMember { node: 2, role: MemberRole::Passive },
                PartitionMember { node: 3, role: MemberRole::Reserve },
            ],
        };
        assert_eq!(initial_voters(&config), BTreeSet::from([1]));
    }
}
