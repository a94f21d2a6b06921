//! End-to-end exercise of the partition router against a single-replica partition wired through
//! the loopback messaging plane: open a session, submit commands, and read them back, the same
//! path a real client takes against a multi-node partition (§8 seed scenario 1, single-node form).

use std::sync::Arc;
use std::time::Duration;

use atomix_cluster::LoopbackPlane;
use atomix_cluster::MemberRole;
use atomix_cluster::MessagingNetwork;
use atomix_cluster::PartitionClient;
use atomix_cluster::PartitionConfig;
use atomix_cluster::PartitionGroup;
use atomix_cluster::PartitionMember;
use atomix_cluster::PartitionReplica;
use atomix_cluster::ReadConsistency;
use atomix_primitives::default_registry;
use atomix_primitives::services::counter::CounterCommand;
use atomix_primitives::services::counter::CounterQuery;
use atomix_primitives::PrimitiveHost;
use atomix_raft::config::StorageLevel;
use atomix_raft::Config;
use atomix_raft::Raft;
use atomix_raft::State;
use atomix_raft_store::AtomixStore;
use maplit::btreeset;

async fn spawn_single_node_replica(plane: &Arc<LoopbackPlane>, id: u64) -> Raft<atomix_primitives::Command, atomix_primitives::Response, MessagingNetwork<LoopbackPlane>, AtomixStore<PrimitiveHost>> {
    let config = Arc::new(Config::build("atomix-cluster-test").validate().unwrap());
    let network = Arc::new(MessagingNetwork::new(id, plane.clone(), Duration::from_millis(500)));
    let persistence = atomix_raft_store::for_level(StorageLevel::Memory, "");
    let store = Arc::new(AtomixStore::open(id, persistence, PrimitiveHost::new(default_registry())).await.unwrap());

    let raft = Raft::new(id, config, network, store);
    let replica = Arc::new(PartitionReplica::new(id, raft.clone()));
    plane.register(id, replica).await;

    raft.initialize(btreeset! {id}).await.unwrap();
    raft.wait(Some(Duration::from_secs(2))).state(State::Leader, "become leader").await.unwrap();
    raft
}

#[tokio::test]
async fn open_session_submit_and_query_roundtrip() {
    let plane = Arc::new(LoopbackPlane::new());
    let _raft = spawn_single_node_replica(&plane, 1).await;

    let group = PartitionGroup::new(
        "default",
        maplit::btreemap! {
            0 => PartitionConfig { id: 0, members: vec![PartitionMember { node: 1, role: MemberRole::Active }] },
        },
    );
    let client = PartitionClient::new(plane.clone(), group, Duration::from_millis(500));

    let session = client.open_session(0, "counter", "my-counter", 30_000, "client-a").await.unwrap();
    assert!(session > 0);

    let incr = serde_json::to_vec(&CounterCommand::Increment { delta: 5 }).unwrap();
    let result = client.submit(0, "my-counter", incr).await.unwrap();
    let value: i64 = serde_json::from_slice(&result).unwrap();
    assert_eq!(value, 5);

    let incr_again = serde_json::to_vec(&CounterCommand::Increment { delta: 7 }).unwrap();
    let result = client.submit(0, "my-counter", incr_again).await.unwrap();
    let value: i64 = serde_json::from_slice(&result).unwrap();
    assert_eq!(value, 12);

    let query = serde_json::to_vec(&CounterQuery::Get).unwrap();
    let result = client.query(0, "my-counter", query, ReadConsistency::Linearizable, Some(session)).await.unwrap();
    let value: i64 = serde_json::from_slice(&result).unwrap();
    assert_eq!(value, 12);
}

#[tokio::test]
async fn router_resolves_keyed_primitive_to_stable_partition() {
    use atomix_cluster::PartitionRouter;
    use atomix_cluster::RoutingStrategy;

    let plane = Arc::new(LoopbackPlane::new());
    let _raft = spawn_single_node_replica(&plane, 1).await;

    let group = PartitionGroup::new(
        "default",
        maplit::btreemap! {
            0 => PartitionConfig { id: 0, members: vec![PartitionMember { node: 1, role: MemberRole::Active }] },
        },
    );
    let client = Arc::new(PartitionClient::new(plane.clone(), group, Duration::from_millis(500)));

    let mut router = PartitionRouter::new();
    router.add_group(client);
    router.bind_primitive("map", "default", RoutingStrategy::MultiPrimary);

    let (resolved_a, partition_a) = router.resolve("map", "orders/42").unwrap();
    let (_resolved_b, partition_b) = router.resolve("map", "orders/42").unwrap();
    assert_eq!(partition_a, partition_b);
    assert_eq!(partition_a, 0);
    let _ = resolved_a;

    assert!(router.resolve("nonexistent", "x").is_err());
}

#[tokio::test]
async fn unknown_service_name_on_submit_is_reported_as_no_session() {
    let plane = Arc::new(LoopbackPlane::new());
    let _raft = spawn_single_node_replica(&plane, 1).await;

    let group = PartitionGroup::new(
        "default",
        maplit::btreemap! {
            0 => PartitionConfig { id: 0, members: vec![PartitionMember { node: 1, role: MemberRole::Active }] },
        },
    );
    let client = PartitionClient::new(plane.clone(), group, Duration::from_millis(500));

    let err = client.submit(0, "never-opened", vec![]).await.unwrap_err();
    match err {
        atomix_cluster::RouterError::NoSession(name, partition) => {
            assert_eq!(name, "never-opened");
            assert_eq!(partition, 0);
        }
        other => panic!("expected NoSession, got {:?}", other),
    }
}
