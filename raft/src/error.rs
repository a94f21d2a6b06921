//! Error types returned by the Raft core and its public API.
//!
//! These map directly onto §7 of the platform's error-handling design: callers are expected to
//! match on the variants below to decide whether to retry, rotate to a different member, or
//! surface a fatal error to the operator.

use thiserror::Error;

use crate::raft_types::SnapshotSegmentId;
use crate::AppData;
use crate::NodeId;

/// The result type used throughout the Raft core.
pub type RaftResult<T> = std::result::Result<T, RaftError>;

/// Errors which can take place when a `RaftStorage` or `RaftNetwork` impl, or the
/// protocol logic itself, can no longer proceed safely.
#[derive(Debug, Error)]
pub enum RaftError {
    /// The storage layer returned an error. Per §7, this is never swallowed: the replica
    /// transitions to `State::Inactive` and stops participating until an operator intervenes.
    #[error("raft storage error: {0}")]
    RaftStorage(#[source] anyhow::Error),

    /// The network layer returned an error while attempting to contact a peer.
    #[error("raft network error: {0}")]
    RaftNetwork(#[source] anyhow::Error),

    /// An I/O error occurred while streaming a snapshot chunk.
    #[error("snapshot I/O error: {0}")]
    SnapshotIO(#[from] std::io::Error),

    /// A received `InstallSnapshot` chunk does not match the segment the replica expected next;
    /// the replica restarts the transfer from the leader's new offset.
    #[error("received out-of-order snapshot segment: expected {expect}, got {got}")]
    SnapshotMismatch { expect: SnapshotSegmentId, got: SnapshotSegmentId },

    /// The Raft node has unrecoverably halted; see `State::Inactive`.
    #[error("raft replica is inactive: {0}")]
    Fatal(#[source] anyhow::Error),

    /// The Raft node's background task has been dropped or told to shut down.
    #[error("raft is shutting down")]
    ShuttingDown,
}

/// An error related to a client read request.
#[derive(Debug, Error)]
pub enum ClientReadError {
    /// This node is not the cluster leader; the caller should retry at the given hint.
    #[error("this node is not the Raft leader, current leader: {0:?}")]
    ForwardToLeader(Option<NodeId>),

    /// An underlying Raft protocol error.
    #[error(transparent)]
    RaftError(#[from] RaftError),
}

/// An error related to a client write request.
#[derive(Debug, Error)]
pub enum ClientWriteError<D: AppData> {
    /// This node is not the cluster leader; the caller should retry the same payload at the
    /// given hint, reusing its session sequence number for idempotency.
    #[error("this node is not the Raft leader, current leader: {1:?}")]
    ForwardToLeader(D, Option<NodeId>),

    /// An underlying Raft protocol error.
    #[error(transparent)]
    RaftError(#[from] RaftError),
}

/// An error related to the one-time cluster `initialize` call.
#[derive(Debug, Error)]
pub enum InitializeError {
    /// `initialize` was called on a node which is not in a pristine state.
    #[error("the cluster is already initialized, or this node's state is not pristine")]
    NotAllowed,

    /// An underlying Raft protocol error.
    #[error(transparent)]
    RaftError(#[from] RaftError),
}

/// An error related to a proposed cluster membership change.
#[derive(Debug, Error)]
pub enum ChangeConfigError {
    /// This node is not the cluster leader.
    #[error("this node is not the Raft leader, current leader: {0:?}")]
    NodeNotLeader(Option<NodeId>),

    /// The proposed config change is already in progress; callers should not submit another
    /// until the first completes.
    #[error("a configuration change is already in progress")]
    ConfigChangeInProgress,

    /// The proposed config would leave the cluster with zero voters.
    #[error("the proposed configuration would leave no voting members")]
    InoperableConfig,

    /// The proposed change is a no-op (target already a member, or already being synced).
    #[error("the proposed membership change has no effect")]
    Noop,

    /// An underlying Raft protocol error.
    #[error(transparent)]
    RaftError(#[from] RaftError),
}

/// The response to an internal (non-client) Raft write, such as a configuration change.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error(transparent)]
    ChangeConfig(#[from] ChangeConfigError),

    #[error(transparent)]
    Raft(#[from] RaftError),
}

impl From<ChangeConfigError> for RaftError {
    fn from(err: ChangeConfigError) -> Self {
        match err {
            ChangeConfigError::RaftError(e) => e,
            other => RaftError::RaftNetwork(anyhow::anyhow!(other.to_string())),
        }
    }
}
