//! Partition/PartitionGroup model, the Partition Router/Client (§4.5), the Messaging Plane
//! (§4.6), and membership glue (§4.7) — the pieces that sit between a primitive-holding client
//! and the `atomix-raft` replica hosting its partition.
//!
//! `atomix-raft`, `atomix-raft-store`, and `atomix-primitives` are all transport-agnostic by
//! design (§1: "Wire transport is pluggable"); this crate is where a concrete transport
//! ([`messaging::MessagingPlane`]) gets chosen and wired to both the Raft layer's own RPCs
//! ([`network::MessagingNetwork`]) and the client-facing partition router ([`router`]).

pub mod membership;
pub mod messaging;
pub mod network;
pub mod partition;
pub mod router;

pub use membership::DiscoveryEvent;
pub use membership::MembershipWatcher;
pub use messaging::Envelope;
pub use messaging::InboundMessage;
pub use messaging::LoopbackPlane;
pub use messaging::MessageHandler;
pub use messaging::MessagingError;
pub use messaging::MessagingPlane;
pub use messaging::OutboundMessage;
pub use network::MessagingNetwork;
pub use network::PartitionReplica;
pub use partition::GroupType;
pub use partition::MemberRole;
pub use partition::PartitionConfig;
pub use partition::PartitionGroup;
pub use partition::PartitionId;
pub use partition::PartitionMember;
pub use router::PartitionClient;
pub use router::PartitionRouter;
pub use router::ReadConsistency;
pub use router::RouterError;
pub use router::RoutingStrategy;
