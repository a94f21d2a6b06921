//! The log-entry payloads the state machine applies (§3 LogEntry `kind`, §6 wire RPCs).

use serde::Deserialize;
use serde::Serialize;

use crate::session::SessionId;

/// The payload carried by a `CommandEntry`/`QueryEntry`/session-management log entry.
///
/// `OpenSession`/`KeepAlive`/`CloseSession` are handled directly by the session manager;
/// `Submit`/`Query` are routed through to the named service after session bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Command {
    OpenSession {
        member_id: String,
        service_type: String,
        service_name: String,
        timeout_ms: u64,
    },
    KeepAlive {
        session_id: SessionId,
        command_sequence_ack: u64,
        event_index_ack: u64,
    },
    CloseSession {
        session_id: SessionId,
    },
    Submit {
        session_id: SessionId,
        sequence: u64,
        payload: Vec<u8>,
    },
    Query {
        session_id: Option<SessionId>,
        service_name: String,
        payload: Vec<u8>,
    },
}

/// Caller-visible error kinds (§7 Error handling design).
///
/// `NotLeader`/`NoLeader`/`Unavailable`/`Timeout`/`ReadStale` are produced by the partition
/// router/client rather than the state machine itself; they're modeled here so a single error
/// type can flow end-to-end from service to client.
#[derive(Clone, Debug, Serialize, Deserialize, thiserror::Error)]
pub enum AtomixError {
    #[error("no leader is currently known for this partition")]
    NoLeader,
    #[error("this replica is not the leader, retry at {hint:?}")]
    NotLeader { hint: Option<u64> },
    #[error("request timed out")]
    Timeout,
    #[error("partition is unavailable")]
    Unavailable,
    #[error("session {0} has been closed")]
    ClosedSession(SessionId),
    #[error("session {0} is unknown to this replica")]
    UnknownSession(SessionId),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("read is too stale to satisfy the requested consistency")]
    ReadStale,
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl From<crate::session::SessionError> for AtomixError {
    fn from(err: crate::session::SessionError) -> Self {
        match err {
            crate::session::SessionError::UnknownSession(id) => AtomixError::UnknownSession(id),
            crate::session::SessionError::ClosedSession(id) => AtomixError::ClosedSession(id),
        }
    }
}

impl From<crate::service::ServiceError> for AtomixError {
    fn from(err: crate::service::ServiceError) -> Self {
        AtomixError::CommandFailed(err.to_string())
    }
}

/// The response to an applied [`Command`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    SessionOpened { session_id: SessionId },
    Acked,
    SessionClosed,
    Result { payload: Vec<u8> },
    Error(AtomixError),
}
