//! Log & Storage (§4.1): the concrete [`atomix_raft::RaftStorage`] implementation that glues the
//! durable per-partition log/snapshot layer to the session+service state machine defined in
//! `atomix-primitives`.
//!
//! This crate is the only place the protocol core (`atomix-raft`) and the deterministic
//! application layer (`atomix-primitives`) meet: `atomix-raft` knows nothing about sessions or
//! services, and `atomix-primitives` knows nothing about logs or terms.

mod log;
mod persist;
mod store;

pub use log::LogError;
pub use log::PartitionLog;
pub use persist::for_level;
pub use persist::FilePersistence;
pub use persist::MemoryPersistence;
pub use persist::Persistence;
pub use store::AtomixStore;
pub use store::ClientRequest;
pub use store::ClientResponse;
pub use store::StorageDebugState;
