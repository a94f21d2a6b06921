//! Partition Router / Client (§4.5): maps `(primitive, key)` to a partition, maintains per-session
//! leader affinity, and retries/rotates/dedupes command submission under failover.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use atomix_primitives::AtomixError;
use atomix_primitives::Command;
use atomix_primitives::Response;
use atomix_primitives::SessionId;
use atomix_raft::NodeId;
use tokio::sync::RwLock;

use crate::messaging::Envelope;
use crate::messaging::InboundMessage;
use crate::messaging::MessagingError;
use crate::messaging::MessagingPlane;
use crate::messaging::OutboundMessage;
use crate::partition::GroupName;
use crate::partition::PartitionConfig;
use crate::partition::PartitionGroup;
use crate::partition::PartitionId;

/// The routing scheme used to map a primitive operation to a partition (§4.5 step 1).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoutingStrategy {
    /// `key hash mod N`: a keyed primitive (map, lock) is pinned to exactly one partition.
    MultiPrimary,
    /// Replicated to all partitions in the group; the first to accept wins. Used for primitives
    /// with no natural key, such as a cluster-wide leader election singleton.
    AntiEntropy,
}

/// Read consistency levels a query may request (§4.5 step 4).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadConsistency {
    /// Round-trip via the leader; the leader confirms it still holds majority heartbeats before
    /// responding.
    Linearizable,
    /// The leader answers from local state while its lease is valid; no round-trip.
    LinearizableLease,
    /// Any replica may answer, but responses for a given session must be monotonic in the commit
    /// index that session has already observed.
    Sequential,
    /// Any replica, no monotonicity guarantee.
    Eventual,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no partition in group '{0}' accepted the request")]
    NoPartitionAvailable(GroupName),
    #[error("no known members for partition {0}/{1}")]
    NoMembers(GroupName, PartitionId),
    #[error("request to partition {0}/{1} exhausted all known members")]
    MembersExhausted(GroupName, PartitionId),
    #[error("no open session for service '{0}' on partition {1}")]
    NoSession(String, PartitionId),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
    #[error(transparent)]
    Atomix(#[from] AtomixError),
}

/// Per-partition client state: the session bound to this `(partition, service)` pair and the
/// leader this client currently believes is in charge (§4.5: "maintains per-session leader
/// affinity").
struct PartitionSession {
    session_id: SessionId,
    leader_hint: Option<NodeId>,
    sequence: AtomicU64,
}

/// A client-side handle to one partition group, holding one [`PartitionSession`] per
/// `(partition, service name)` pair it has opened a session against.
pub struct PartitionClient<P: MessagingPlane> {
    plane: Arc<P>,
    group: PartitionGroup,
    deadline: Duration,
    sessions: RwLock<BTreeMap<(PartitionId, String), PartitionSession>>,
}

impl<P: MessagingPlane> PartitionClient<P> {
    pub fn new(plane: Arc<P>, group: PartitionGroup, deadline: Duration) -> Self {
        Self { plane, group, deadline, sessions: RwLock::new(BTreeMap::new()) }
    }

    fn partition_config(&self, id: PartitionId) -> Result<&PartitionConfig, RouterError> {
        self.group.partition(id).ok_or_else(|| RouterError::NoMembers(self.group.name.clone(), id))
    }

    /// Send `command` to `target`, returning the decoded [`Response`]. Internal helper shared by
    /// session management and command submission.
    async fn send(&self, target: NodeId, command: Command) -> Result<Response, MessagingError> {
        let envelope = Envelope::new(0, None, OutboundMessage::Client(command));
        let reply = self.plane.send(target, envelope, self.deadline).await?;
        match reply.body {
            InboundMessage::Client(resp) => Ok(resp),
            _ => Err(MessagingError::StaleEnvelope { expected: 0, received: reply.term }),
        }
    }

    /// Try `command` against each member of `partition`'s rotation order in turn, starting at
    /// `start_hint` if given, until one accepts or the rotation is exhausted (§4.5 step 3: "rotate
    /// through known members of the partition in order and retry with the same sequence number").
    async fn send_with_rotation(
        &self,
        partition: &PartitionConfig,
        start_hint: Option<NodeId>,
        command: Command,
    ) -> Result<(Response, NodeId), RouterError> {
        let mut order = partition.rotation_order();
        if order.is_empty() {
            return Err(RouterError::NoMembers(self.group.name.clone(), partition.id));
        }
        if let Some(hint) = start_hint {
            if let Some(pos) = order.iter().position(|n| *n == hint) {
                order.rotate_left(pos);
            }
        }

        let mut last_err = None;
        for candidate in order {
            match self.send(candidate, command.clone()).await {
                Ok(Response::Error(AtomixError::NotLeader { hint: Some(leader) })) => {
                    // Retry once more, directly at the hinted leader, before falling through to
                    // the rest of the rotation (§7 NotLeader recovery policy).
                    match self.send(leader, command.clone()).await {
                        Ok(resp) => return Ok((resp, leader)),
                        Err(err) => last_err = Some(err.into()),
                    }
                }
                Ok(Response::Error(AtomixError::NotLeader { hint: None })) | Ok(Response::Error(AtomixError::NoLeader)) => continue,
                Ok(resp) => return Ok((resp, candidate)),
                Err(err) => last_err = Some(err.into()),
            }
        }
        Err(last_err.unwrap_or_else(|| RouterError::MembersExhausted(self.group.name.clone(), partition.id)))
    }

    /// Open a session against `service_name` on `partition_id`, reusing an existing one if this
    /// client already holds it (§4.5 step 2).
    pub async fn open_session(
        &self,
        partition_id: PartitionId,
        service_type: &str,
        service_name: &str,
        timeout_ms: u64,
        member_id: &str,
    ) -> Result<SessionId, RouterError> {
        let key = (partition_id, service_name.to_string());
        if let Some(existing) = self.sessions.read().await.get(&key) {
            return Ok(existing.session_id);
        }

        let partition = self.partition_config(partition_id)?;
        let command = Command::OpenSession {
            member_id: member_id.to_string(),
            service_type: service_type.to_string(),
            service_name: service_name.to_string(),
            timeout_ms,
        };
        let (response, leader) = self.send_with_rotation(partition, None, command).await?;
        let session_id = match response {
            Response::SessionOpened { session_id } => session_id,
            Response::Error(err) => return Err(err.into()),
            other => return Err(RouterError::Atomix(AtomixError::IllegalState(format!("unexpected reply to OpenSession: {:?}", other)))),
        };

        self.sessions
            .write()
            .await
            .insert(key, PartitionSession { session_id, leader_hint: Some(leader), sequence: AtomicU64::new(0) });
        Ok(session_id)
    }

    /// Submit a command to `service_name` on `partition_id`, retrying with the same sequence
    /// number on timeout/`NotLeader` so the session's response cache guarantees at-most-once
    /// application despite the retry (§4.5 step 3, §7 Timeout recovery policy).
    pub async fn submit(&self, partition_id: PartitionId, service_name: &str, payload: Vec<u8>) -> Result<Vec<u8>, RouterError> {
        let key = (partition_id, service_name.to_string());
        let (session_id, sequence, leader_hint) = {
            let sessions = self.sessions.read().await;
            let session = sessions.get(&key).ok_or_else(|| RouterError::NoSession(service_name.to_string(), partition_id))?;
            (session.session_id, session.sequence.fetch_add(1, Ordering::SeqCst) + 1, session.leader_hint)
        };

        let partition = self.partition_config(partition_id)?;
        let command = Command::Submit { session_id, sequence, payload };
        let (response, leader) = self.send_with_rotation(partition, leader_hint, command).await?;

        if let Some(session) = self.sessions.write().await.get_mut(&key) {
            session.leader_hint = Some(leader);
        }

        match response {
            Response::Result { payload } => Ok(payload),
            Response::Error(err) => Err(err.into()),
            other => Err(RouterError::Atomix(AtomixError::IllegalState(format!("unexpected reply to Submit: {:?}", other)))),
        }
    }

    /// Serve a query under the given consistency level (§4.5 step 4).
    ///
    /// `Linearizable`/`LinearizableLease` are both served by the leader — the distinction between
    /// a leader-lease read and a full round-trip read is an internal property of how the leader
    /// itself answers `client_read`/`client_write`, not something the router needs to express
    /// differently on the wire; it already sends every query to the partition's current leader.
    /// `Sequential`/`Eventual` may be served by any rotation member, with `Sequential` additionally
    /// requiring the replica to have caught up to the session's `lastCommit` floor before replying.
    pub async fn query(
        &self,
        partition_id: PartitionId,
        service_name: &str,
        payload: Vec<u8>,
        consistency: ReadConsistency,
        session_id: Option<SessionId>,
    ) -> Result<Vec<u8>, RouterError> {
        let partition = self.partition_config(partition_id)?;
        let command = Command::Query { session_id, service_name: service_name.to_string(), payload };

        let response = match consistency {
            ReadConsistency::Linearizable | ReadConsistency::LinearizableLease => {
                let hint = match session_id {
                    Some(id) => self.sessions.read().await.iter().find(|(_, s)| s.session_id == id).and_then(|(_, s)| s.leader_hint),
                    None => None,
                };
                self.send_with_rotation(partition, hint, command).await?.0
            }
            ReadConsistency::Sequential | ReadConsistency::Eventual => {
                let candidates = partition.rotation_order();
                let target = *candidates.first().ok_or_else(|| RouterError::NoMembers(self.group.name.clone(), partition.id))?;
                self.send(target, command).await?
            }
        };

        match response {
            Response::Result { payload } => Ok(payload),
            Response::Error(AtomixError::ReadStale) if consistency == ReadConsistency::Sequential => {
                Err(RouterError::Atomix(AtomixError::ReadStale))
            }
            Response::Error(err) => Err(err.into()),
            other => Err(RouterError::Atomix(AtomixError::IllegalState(format!("unexpected reply to Query: {:?}", other)))),
        }
    }
}

/// Maps `(primitive name, key?)` to a `(group, partition)` pair across every configured
/// [`PartitionGroup`] and hands back the [`PartitionClient`] for that group (§4.5 step 1).
///
/// A deployment typically hosts exactly one group (plus the mandatory management group, §6), but
/// the router supports several so a facade can place different primitive catalogs in different
/// groups.
pub struct PartitionRouter<P: MessagingPlane> {
    clients: BTreeMap<GroupName, Arc<PartitionClient<P>>>,
    primitive_groups: BTreeMap<String, (GroupName, RoutingStrategy)>,
}

impl<P: MessagingPlane> PartitionRouter<P> {
    pub fn new() -> Self {
        Self { clients: BTreeMap::new(), primitive_groups: BTreeMap::new() }
    }

    pub fn add_group(&mut self, client: Arc<PartitionClient<P>>) -> &mut Self {
        self.clients.insert(client.group.name.clone(), client);
        self
    }

    /// Declare that primitives of type `primitive_type` live in `group`, routed via `strategy`.
    pub fn bind_primitive(&mut self, primitive_type: impl Into<String>, group: impl Into<GroupName>, strategy: RoutingStrategy) -> &mut Self {
        self.primitive_groups.insert(primitive_type.into(), (group.into(), strategy));
        self
    }

    /// Resolve `(primitive_type, key)` to the partition id that owns it within its bound group.
    pub fn resolve(&self, primitive_type: &str, key: &str) -> Result<(Arc<PartitionClient<P>>, PartitionId), RouterError> {
        let (group_name, strategy) = self
            .primitive_groups
            .get(primitive_type)
            .ok_or_else(|| RouterError::Atomix(AtomixError::ConfigurationError(format!("primitive type '{}' is not bound to any partition group", primitive_type))))?;
        let client = self.clients.get(group_name).ok_or_else(|| RouterError::NoMembers(group_name.clone(), 0))?;

        let partition_id = match strategy {
            RoutingStrategy::MultiPrimary => crate::partition::key_to_partition(key, client.group.partition_count()),
            RoutingStrategy::AntiEntropy => 0,
        };
        Ok((client.clone(), partition_id))
    }
}

impl<P: MessagingPlane> Default for PartitionRouter<P> {
    fn default() -> Self {
        Self::new()
    }
}
