//! Top-level facade: `Node` composes a `Cluster` (routing) and, for locally hosted partitions, a
//! `ServiceRegistry`/`PartitionReplica` set (§9 DESIGN NOTES: composition over inheritance,
//! replacing the source's `AtomixCluster -> Atomix -> AbstractListenable` hierarchy).
//!
//! This crate wires the lower layers together; it implements no protocol logic of its own. Pick a
//! [`atomix_cluster::MessagingPlane`] (a real transport, [`atomix_cluster::LoopbackPlane`], or
//! `atomix_raft_bus_shim::BusMessagingPlane`), build a [`atomix_cluster::PartitionClient`] over it,
//! and hand it to [`Cluster::add_group`].

pub mod events;
pub mod node;

pub use events::EventBus;
pub use node::Cluster;
pub use node::ClusterEvent;
pub use node::Node;
