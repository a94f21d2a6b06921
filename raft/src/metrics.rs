//! Metrics published by a running Raft replica.
//!
//! `RaftCore` publishes a `RaftMetrics` snapshot on every state transition via a `tokio::sync::
//! watch` channel; `Raft::metrics()` hands out a receiver, and `Raft::wait()` wraps that receiver
//! with convenience waiters used heavily by the test harness.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::core::State;
use crate::raft::MembershipConfig;
use crate::replication::ReplicationMetrics;
use crate::LogId;
use crate::NodeId;

/// A snapshot of a Raft replica's state, suitable for monitoring and for routing decisions by a
/// partition client (§4.5: "based on the Raft metrics system which does a good job at staying
/// up-to-date").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RaftMetrics {
    pub id: NodeId,
    pub state: State,
    pub current_term: u64,
    pub last_log_index: u64,
    pub last_applied: u64,
    pub current_leader: Option<NodeId>,
    pub membership_config: MembershipConfig,
    pub snapshot: LogId,
    pub leader_metrics: Option<LeaderMetrics>,
}

impl RaftMetrics {
    pub fn new_initial(id: NodeId) -> Self {
        Self {
            id,
            state: State::Follower,
            current_term: 0,
            last_log_index: 0,
            last_applied: 0,
            current_leader: None,
            membership_config: MembershipConfig::new_initial(id),
            snapshot: LogId::default(),
            leader_metrics: None,
        }
    }
}

/// Metrics which are only meaningful while this node is the cluster leader.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LeaderMetrics {
    /// Per-follower replication progress.
    pub replication: BTreeMap<NodeId, ReplicationMetrics>,
}

/// A convenience wrapper for awaiting a condition over a replica's published metrics.
///
/// Built from `Raft::wait`; primarily used by the test harness, but equally usable by production
/// code that wants to block until (for example) a replica has caught up to a given commit index.
pub struct Wait {
    pub timeout: Duration,
    pub rx: watch::Receiver<RaftMetrics>,
}

impl Wait {
    /// Wait until the published metrics satisfy an arbitrary predicate.
    pub async fn metrics<T>(&mut self, func: T, msg: impl ToString) -> anyhow::Result<RaftMetrics>
    where T: Fn(&RaftMetrics) -> bool {
        let msg = msg.to_string();
        let fut = async {
            loop {
                {
                    let m = self.rx.borrow();
                    if func(&m) {
                        return Ok(m.clone());
                    }
                }
                if self.rx.changed().await.is_err() {
                    anyhow::bail!("metrics channel closed while waiting for: {}", msg);
                }
            }
        };
        timeout(self.timeout, fut).await.map_err(|_| anyhow::anyhow!("timed out waiting for: {}", msg))?
    }

    /// Wait for `last_log_index` to reach at least `index`.
    pub async fn log(&mut self, index: u64, msg: impl ToString) -> anyhow::Result<RaftMetrics> {
        let msg = msg.to_string();
        self.metrics(move |m| m.last_log_index >= index, format!("last_log_index>={}: {}", index, msg)).await
    }

    /// Wait for the replica to reach the given `State`.
    pub async fn state(&mut self, want: State, msg: impl ToString) -> anyhow::Result<RaftMetrics> {
        let msg = msg.to_string();
        self.metrics(move |m| m.state == want, format!("state=={:?}: {}", want, msg)).await
    }

    /// Wait for the replica's latest-snapshot log id to reach at least `want`.
    pub async fn snapshot(&mut self, want: LogId, msg: impl ToString) -> anyhow::Result<RaftMetrics> {
        let msg = msg.to_string();
        self.metrics(move |m| m.snapshot >= want, format!("snapshot>={}: {}", want, msg)).await
    }

    /// Wait for the replica's observed current leader to become `leader`.
    pub async fn current_leader(&mut self, leader: NodeId, msg: impl ToString) -> anyhow::Result<RaftMetrics> {
        let msg = msg.to_string();
        self.metrics(move |m| m.current_leader == Some(leader), format!("current_leader=={}: {}", leader, msg)).await
    }
}
