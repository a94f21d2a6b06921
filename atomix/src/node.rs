//! `Cluster` and `Node`: composition replacements for the source's `AtomixCluster -> Atomix ->
//! AbstractListenable` inheritance chain (§9 DESIGN NOTES).
//!
//! `Cluster` is the client-facing routing surface: primitive-type bindings, partition resolution,
//! and the session/submit/query calls a user-facing primitive builder would sit on top of. `Node`
//! additionally holds the pieces needed to *host* partitions locally — a [`ServiceRegistry`] for
//! constructing the primitive services a hosted replica's `PrimitiveHost` loads by name, and the
//! set of [`PartitionReplica`]s this process currently serves.

use std::collections::BTreeMap;
use std::sync::Arc;

use atomix_cluster::MessagingPlane;
use atomix_cluster::PartitionClient;
use atomix_cluster::PartitionId;
use atomix_cluster::PartitionReplica;
use atomix_cluster::ReadConsistency;
use atomix_cluster::RouterError;
use atomix_cluster::RoutingStrategy;
use atomix_primitives::PrimitiveHost;
use atomix_primitives::ServiceRegistry;
use atomix_primitives::SessionId;
use atomix_primitives::StateMachine;
use atomix_raft::NodeId;
use tokio::sync::broadcast;
use tokio::sync::RwLock;

use crate::events::EventBus;

/// Events a `Cluster`'s listeners can subscribe to (§9 DESIGN NOTES: shared `EventBus<T>`).
#[derive(Clone, Debug)]
pub enum ClusterEvent {
    PartitionHosted { partition: PartitionId },
    PartitionUnhosted { partition: PartitionId },
}

/// The client-facing routing surface: binds primitive types to partition groups and resolves
/// `(primitive, name)` to the partition owning it, same as [`atomix_cluster::PartitionRouter`]
/// but exposing the session/submit/query calls directly so a primitive builder needs only this
/// one handle.
pub struct Cluster<P: MessagingPlane> {
    router: atomix_cluster::PartitionRouter<P>,
    events: EventBus<ClusterEvent>,
}

impl<P: MessagingPlane> Cluster<P> {
    pub fn new() -> Self {
        Self { router: atomix_cluster::PartitionRouter::new(), events: EventBus::default() }
    }

    pub fn add_group(&mut self, client: Arc<PartitionClient<P>>) -> &mut Self {
        self.router.add_group(client);
        self
    }

    pub fn bind_primitive(&mut self, primitive_type: impl Into<String>, group: impl Into<String>, strategy: RoutingStrategy) -> &mut Self {
        self.router.bind_primitive(primitive_type, group, strategy);
        self
    }

    pub fn events(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    pub async fn open_session(&self, primitive_type: &str, name: &str, timeout_ms: u64, member_id: &str) -> Result<SessionId, RouterError> {
        let (client, partition) = self.router.resolve(primitive_type, name)?;
        client.open_session(partition, primitive_type, name, timeout_ms, member_id).await
    }

    pub async fn submit(&self, primitive_type: &str, name: &str, payload: Vec<u8>) -> Result<Vec<u8>, RouterError> {
        let (client, partition) = self.router.resolve(primitive_type, name)?;
        client.submit(partition, name, payload).await
    }

    pub async fn query(
        &self,
        primitive_type: &str,
        name: &str,
        payload: Vec<u8>,
        consistency: ReadConsistency,
        session_id: Option<SessionId>,
    ) -> Result<Vec<u8>, RouterError> {
        let (client, partition) = self.router.resolve(primitive_type, name)?;
        client.query(partition, name, payload, consistency, session_id).await
    }
}

impl<P: MessagingPlane> Default for Cluster<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// A node in the cluster: a routing [`Cluster`] handle plus, for partitions this process hosts, a
/// [`ServiceRegistry`] and the live [`PartitionReplica`]s built from it (§9 DESIGN NOTES: "`Node`
/// holds a `Cluster` and a `PrimitiveHost`" — generalized here to one replica's worth of
/// `PrimitiveHost` per locally hosted partition, since a node may host more than one).
pub struct Node<P: MessagingPlane, SM: StateMachine = PrimitiveHost> {
    pub id: NodeId,
    pub cluster: Cluster<P>,
    registry: ServiceRegistry,
    hosted: RwLock<BTreeMap<PartitionId, Arc<PartitionReplica<P, SM>>>>,
}

impl<P: MessagingPlane, SM: StateMachine> Node<P, SM> {
    pub fn new(id: NodeId, registry: ServiceRegistry) -> Self {
        Self { id, cluster: Cluster::new(), registry, hosted: RwLock::new(BTreeMap::new()) }
    }

    /// The registry this node's locally hosted [`PrimitiveHost`]s should be built from.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Register a partition replica this node now hosts, built by the caller from
    /// `self.registry()` (construction of the underlying `Raft`/`AtomixStore` stays with the
    /// caller, since it needs the partition's storage path and peer configuration, which this
    /// facade has no opinion on).
    pub async fn host_partition(&self, partition: PartitionId, replica: Arc<PartitionReplica<P, SM>>) {
        self.hosted.write().await.insert(partition, replica);
        self.cluster.events.publish(ClusterEvent::PartitionHosted { partition });
    }

    pub async fn unhost_partition(&self, partition: PartitionId) {
        if self.hosted.write().await.remove(&partition).is_some() {
            self.cluster.events.publish(ClusterEvent::PartitionUnhosted { partition });
        }
    }

    pub async fn hosted_replica(&self, partition: PartitionId) -> Option<Arc<PartitionReplica<P, SM>>> {
        self.hosted.read().await.get(&partition).cloned()
    }
}
