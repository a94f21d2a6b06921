//! Drives a single-node partition replica entirely over the bus shim's wire encoding, proving a
//! client command survives a real JSON encode/decode round trip through the `action`-tagged frames
//! (§6, §9) rather than a direct in-process call.

use std::sync::Arc;
use std::time::Duration;

use atomix_cluster::MemberRole;
use atomix_cluster::PartitionClient;
use atomix_cluster::PartitionConfig;
use atomix_cluster::PartitionGroup;
use atomix_cluster::PartitionMember;
use atomix_cluster::PartitionReplica;
use atomix_primitives::default_registry;
use atomix_primitives::services::counter::CounterCommand;
use atomix_primitives::PrimitiveHost;
use atomix_raft::config::StorageLevel;
use atomix_raft::Config;
use atomix_raft::Raft;
use atomix_raft::State;
use atomix_raft_bus_shim::BusMessagingPlane;
use atomix_raft_bus_shim::LoopbackBus;
use atomix_raft_store::AtomixStore;
use maplit::btreeset;

#[tokio::test]
async fn client_submit_round_trips_through_bus_encoded_frames() {
    let bus = Arc::new(LoopbackBus::new());
    let plane = Arc::new(BusMessagingPlane::new(bus.clone()));

    let id = 1u64;
    let config = Arc::new(Config::build("atomix-bus-shim-test").validate().unwrap());
    let network = Arc::new(atomix_cluster::MessagingNetwork::new(id, plane.clone(), Duration::from_millis(500)));
    let persistence = atomix_raft_store::for_level(StorageLevel::Memory, "");
    let store = Arc::new(AtomixStore::open(id, persistence, PrimitiveHost::new(default_registry())).await.unwrap());
    let raft = Raft::new(id, config, network, store);
    let replica = Arc::new(PartitionReplica::new(id, raft.clone()));
    bus.register(id, replica).await;

    raft.initialize(btreeset! {id}).await.unwrap();
    raft.wait(Some(Duration::from_secs(2))).state(State::Leader, "become leader").await.unwrap();

    let group = PartitionGroup::new(
        "default",
        maplit::btreemap! {
            0 => PartitionConfig { id: 0, members: vec![PartitionMember { node: id, role: MemberRole::Active }] },
        },
    );
    let client = PartitionClient::new(plane, group, Duration::from_millis(500));

    let session_id = client.open_session(0, "counter", "bus-counter", 30_000, "client-a").await.unwrap();
    assert!(session_id > 0);

    let payload = serde_json::to_vec(&CounterCommand::Increment { delta: 3 }).unwrap();
    let result = client.submit(0, "bus-counter", payload).await.unwrap();
    let value: i64 = serde_json::from_slice(&result).unwrap();
    assert_eq!(value, 3);
}
