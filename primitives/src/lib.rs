//! Session management and the primitive service host: the deterministic layer a partition's Raft
//! replica applies committed commands against (§3, §4.3, §4.4).
//!
//! This crate has no dependency on `atomix-raft` or any storage type — it only describes what a
//! `Command` does to a `StateMachine`, so `atomix-raft-store` can depend on it without creating a
//! cycle back to the replication layer.

mod command;
mod service;
mod session;
mod state_machine;

pub mod services {
    pub mod counter;
    pub mod election;
    pub mod lock;
    pub mod map;
}

pub use command::AtomixError;
pub use command::Command;
pub use command::Response;
pub use service::ApplyResult;
pub use service::PrimitiveService;
pub use service::ReplicaRole;
pub use service::ServiceContext;
pub use service::ServiceError;
pub use service::ServiceFactory;
pub use service::ServiceRegistry;
pub use session::ApplyOutcome;
pub use session::Session;
pub use session::SessionError;
pub use session::SessionEvent;
pub use session::SessionId;
pub use session::SessionManager;
pub use state_machine::PrimitiveHost;
pub use state_machine::StateMachine;

/// Build a [`ServiceRegistry`] preloaded with the built-in primitive services (§4.4 catalog).
///
/// Individual deployments are free to build their own registry with a different service mix;
/// this is the convenient default used by the `atomix` facade crate.
pub fn default_registry() -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry.register("counter", Box::new(|| Box::new(services::counter::Counter::default())));
    registry.register("map", Box::new(|| Box::new(services::map::Map::default())));
    registry.register("lock", Box::new(|| Box::new(services::lock::Lock::default())));
    registry.register("leader-election", Box::new(|| Box::new(services::election::LeaderElection::default())));
    registry
}
