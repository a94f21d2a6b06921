//! The primitive service host (§4.4): loads named, deterministic service instances and drives
//! `apply` against them inside a fixed context.

use std::collections::BTreeMap;
use std::fmt;

use crate::session::SessionId;

/// The context visible to a service while it is being applied.
///
/// Every field here is replicated (derived from the applying log entry), so two replicas
/// constructing the same context for the same index always agree; this is what makes it safe for
/// a service to read `timestamp` instead of the wall clock.
#[derive(Clone, Copy, Debug)]
pub struct ServiceContext {
    pub index: u64,
    pub timestamp: i64,
    pub role: ReplicaRole,
    pub session: Option<SessionId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaRole {
    Leader,
    Follower,
}

/// Errors a service's `apply` may return; anything else is a programming bug in the service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Command(String),
    #[error("failed to decode command payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A deterministic state machine bound to one service instance within a partition (§3
/// PrimitiveService).
///
/// Implementations must not read the wall clock, iterate in a non-deterministic order, or perform
/// external I/O from any of these methods — the host calls them identically, in the same order,
/// on every replica.
pub trait PrimitiveService: Send {
    /// The `ServiceType` name this instance was constructed for, used for log/metrics labeling.
    fn service_type(&self) -> &'static str;

    /// Apply a mutating command; may call `ctx.emit` (via the returned events, see
    /// [`ApplyResult`]) to publish session events alongside the command's own result.
    fn apply_command(&mut self, ctx: ServiceContext, command: &[u8]) -> Result<ApplyResult, ServiceError>;

    /// Serve a non-mutating query against the current state.
    fn apply_query(&self, ctx: ServiceContext, query: &[u8]) -> Result<Vec<u8>, ServiceError>;

    /// Serialize the full state of this service for inclusion in a partition snapshot.
    fn backup(&self) -> Vec<u8>;

    /// Replace this service's state from a previously captured `backup`.
    fn restore(&mut self, bytes: &[u8]);

    /// Veto compaction past `index` if this service still needs events retained from there.
    ///
    /// Queried *before* the snapshot is taken (§9 Open Questions), so a `false` here must block
    /// the compaction attempt rather than merely being informational after the fact.
    fn can_delete(&self, _index: u64) -> bool {
        true
    }

    /// Notify the service that a session bound to it has closed or expired, so session-scoped
    /// state (a held lock, a leadership) can be released deterministically on every replica.
    fn on_session_end(&mut self, _session: SessionId) {}
}

/// The result of applying a command: the response payload plus any session events it produced.
pub struct ApplyResult {
    pub response: Vec<u8>,
    pub events: Vec<Vec<u8>>,
}

impl ApplyResult {
    pub fn response(response: Vec<u8>) -> Self {
        Self { response, events: Vec::new() }
    }

    pub fn with_events(response: Vec<u8>, events: Vec<Vec<u8>>) -> Self {
        Self { response, events }
    }
}

pub type ServiceFactory = Box<dyn Fn() -> Box<dyn PrimitiveService> + Send + Sync>;

/// Maps a `ServiceType` name to a factory for constructing fresh instances, replacing the
/// source's reflection-driven registry (§9 Design notes) with explicit tag-dispatch.
#[derive(Default)]
pub struct ServiceRegistry {
    factories: BTreeMap<&'static str, ServiceFactory>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry").field("types", &self.factories.keys().collect::<Vec<_>>()).finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service_type: &'static str, factory: ServiceFactory) -> &mut Self {
        self.factories.insert(service_type, factory);
        self
    }

    pub fn create(&self, service_type: &str) -> Option<Box<dyn PrimitiveService>> {
        self.factories.get(service_type).map(|f| f())
    }
}
