//! Exercises the `Node`/`Cluster` facade end-to-end: host a partition, bind a primitive type to
//! it, submit through the facade, and observe the resulting `PartitionHosted` event.

use std::sync::Arc;
use std::time::Duration;

use atomix::Cluster;
use atomix::ClusterEvent;
use atomix::Node;
use atomix_cluster::LoopbackPlane;
use atomix_cluster::MemberRole;
use atomix_cluster::MessagingNetwork;
use atomix_cluster::PartitionClient;
use atomix_cluster::PartitionConfig;
use atomix_cluster::PartitionGroup;
use atomix_cluster::PartitionMember;
use atomix_cluster::PartitionReplica;
use atomix_cluster::RoutingStrategy;
use atomix_primitives::default_registry;
use atomix_primitives::services::counter::CounterCommand;
use atomix_primitives::PrimitiveHost;
use atomix_raft::config::StorageLevel;
use atomix_raft::Config;
use atomix_raft::Raft;
use atomix_raft::State;
use atomix_raft_store::AtomixStore;
use maplit::btreeset;

#[tokio::test]
async fn submit_through_node_facade_publishes_hosted_event() {
    let plane = Arc::new(LoopbackPlane::new());
    let id = 1u64;

    let config = Arc::new(Config::build("atomix-facade-test").validate().unwrap());
    let network = Arc::new(MessagingNetwork::new(id, plane.clone(), Duration::from_millis(500)));
    let persistence = atomix_raft_store::for_level(StorageLevel::Memory, "");
    let store = Arc::new(AtomixStore::open(id, persistence, PrimitiveHost::new(default_registry())).await.unwrap());
    let raft = Raft::new(id, config, network, store);
    let replica = Arc::new(PartitionReplica::new(id, raft.clone()));
    plane.register(id, replica.clone()).await;

    raft.initialize(btreeset! {id}).await.unwrap();
    raft.wait(Some(Duration::from_secs(2))).state(State::Leader, "become leader").await.unwrap();

    let node = Node::new(id, default_registry());
    let mut events = node.cluster.events();
    node.host_partition(0, replica).await;
    assert!(matches!(events.recv().await.unwrap(), ClusterEvent::PartitionHosted { partition: 0 }));
    assert!(node.hosted_replica(0).await.is_some());

    let group = PartitionGroup::new(
        "default",
        maplit::btreemap! {
            0 => PartitionConfig { id: 0, members: vec![PartitionMember { node: id, role: MemberRole::Active }] },
        },
    );
    let client = Arc::new(PartitionClient::new(plane, group, Duration::from_millis(500)));

    let mut cluster: Cluster<LoopbackPlane> = Cluster::new();
    cluster.add_group(client);
    cluster.bind_primitive("counter", "default", RoutingStrategy::MultiPrimary);

    cluster.open_session("counter", "facade-counter", 30_000, "client-a").await.unwrap();
    let payload = serde_json::to_vec(&CounterCommand::Increment { delta: 9 }).unwrap();
    let result = cluster.submit("counter", "facade-counter", payload).await.unwrap();
    let value: i64 = serde_json::from_slice(&result).unwrap();
    assert_eq!(value, 9);
}
