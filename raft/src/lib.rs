//! The Raft consensus core: leader election, log replication, and snapshot transfer.
//!
//! This crate is transport- and storage-agnostic. A caller supplies a [`RaftNetwork`]
//! implementation (how to reach a peer) and a [`RaftStorage`] implementation (how to persist the
//! log, hard state, and state machine); this crate drives the protocol state machine described in
//! the Raft paper on top of them, including the joint-consensus membership-change protocol and
//! chunked snapshot installs.
//!
//! `D` is the application's command payload type and `R` is the corresponding response type;
//! both travel through the log and the state machine as opaque, serializable blobs.

pub mod config;
mod core;
pub mod error;
pub mod metrics;
pub mod raft;
mod raft_types;
mod replication;
pub mod storage;

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use async_trait::async_trait;

pub use config::Config;
pub use core::State;
pub use error::ChangeConfigError;
pub use error::ClientReadError;
pub use error::ClientWriteError;
pub use error::InitializeError;
pub use error::RaftError;
pub use error::RaftResult;
pub use error::ResponseError;
pub use metrics::LeaderMetrics;
pub use metrics::RaftMetrics;
pub use raft::Raft;
pub use raft_types::quorum;
pub use raft_types::LogId;
pub use raft_types::MessageSummary;
pub use raft_types::SnapshotId;
pub use raft_types::SnapshotSegmentId;
pub use raft_types::Update;
pub use replication::ReplicationMetrics;
pub use storage::RaftStorage;
pub use storage::RaftStorageDebug;
pub use storage::SnapshotMeta;

/// The identifier of a single node participating in a Raft replica set.
///
/// Node ids are opaque to this crate: the partition layer maps them to network addresses.
pub type NodeId = u64;

/// A command payload which can be proposed to a Raft replica set and appear in its log.
///
/// Blanket-implemented for any type satisfying the bounds: nothing in this crate cares what `D`
/// actually contains, only that it can cross task and process boundaries.
pub trait AppData: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> AppData for T where T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// The response produced by applying an [`AppData`] command to the state machine.
pub trait AppDataResponse: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> AppDataResponse for T where T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// The network layer a `Raft` instance uses to reach its peers.
///
/// Implementations are expected to be cheap to clone (an `Arc`-backed client, typically) and to
/// surface transport failures as `Err` rather than hanging; the Raft core applies its own
/// per-RPC timeouts around these calls but cannot distinguish "slow" from "down" on its own.
#[async_trait]
pub trait RaftNetwork<D>: Send + Sync + 'static
where D: AppData
{
    /// Send an `AppendEntries` RPC to the target node.
    async fn send_append_entries(
        &self,
        target: NodeId,
        rpc: raft::AppendEntriesRequest<D>,
    ) -> anyhow::Result<raft::AppendEntriesResponse>;

    /// Send an `InstallSnapshot` RPC to the target node.
    async fn send_install_snapshot(
        &self,
        target: NodeId,
        rpc: raft::InstallSnapshotRequest,
    ) -> anyhow::Result<raft::InstallSnapshotResponse>;

    /// Send a `RequestVote` RPC to the target node.
    async fn send_vote(&self, target: NodeId, rpc: raft::VoteRequest) -> anyhow::Result<raft::VoteResponse>;
}
