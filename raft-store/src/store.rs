//! [`AtomixStore`]: the `RaftStorage` implementation used by every partition replica.
//!
//! Wires together [`crate::log::PartitionLog`] (the ordered entry sequence), a
//! [`crate::persist::Persistence`] backend (durability per the configured `StorageLevel`), and an
//! `atomix_primitives::StateMachine` (the session+service application layer). `ClientRequest`/
//! `ClientResponse` are the `D`/`R` type parameters the `atomix-raft` core is generic over.

use std::io;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use async_trait::async_trait;
use atomix_primitives::PrimitiveHost;
use atomix_primitives::StateMachine;
use atomix_raft::raft::Entry;
use atomix_raft::raft::EntryPayload;
use atomix_raft::raft::MembershipConfig;
use atomix_raft::storage::HardState;
use atomix_raft::storage::InitialState;
use atomix_raft::storage::RaftStorage;
use atomix_raft::storage::RaftStorageDebug;
use atomix_raft::storage::Snapshot;
use atomix_raft::storage::SnapshotMeta;
use atomix_raft::LogId;
use atomix_raft::NodeId;
use atomix_raft::SnapshotId;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncSeek;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;
use tokio::sync::RwLock;

use crate::log::PartitionLog;
use crate::persist::Persistence;

/// The log-entry payload travelling through `atomix-raft`'s `D` type parameter. A thin re-export
/// so callers don't need to depend on `atomix-primitives` just to name the type their `Raft<...>`
/// is parameterized over.
pub type ClientRequest = atomix_primitives::Command;

/// The response travelling back through `atomix-raft`'s `R` type parameter.
pub type ClientResponse = atomix_primitives::Response;

#[derive(Serialize, Deserialize, Default)]
struct PersistedLog {
    entries: Vec<Entry<ClientRequest>>,
    commit_index: u64,
}

struct Inner<SM: StateMachine> {
    log: PartitionLog<ClientRequest>,
    hard_state: HardState,
    membership: MembershipConfig,
    last_applied: LogId,
    state_machine: SM,
    snapshot_meta: Option<SnapshotMeta>,
}

/// A partition replica's storage: durable log + hard state + snapshot, backed by an
/// `atomix_primitives::StateMachine`.
pub struct AtomixStore<SM: StateMachine = PrimitiveHost> {
    id: NodeId,
    persistence: Box<dyn Persistence>,
    inner: RwLock<Inner<SM>>,
}

impl<SM: StateMachine> AtomixStore<SM> {
    /// Open (or create) the store for node `id`, restoring hard state, log, and the latest
    /// snapshot from `persistence` if present (§6 recovery: "scans segments, verifies checksums,
    /// and truncates any torn tail" — simplified here to a single durable blob per artifact,
    /// since the write-then-rename discipline in [`crate::persist::FilePersistence`] already
    /// guarantees no torn writes are ever observed).
    pub async fn open(id: NodeId, persistence: Box<dyn Persistence>, mut state_machine: SM) -> anyhow::Result<Self> {
        let hard_state = match persistence.read("hard-state").await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => HardState::default(),
        };

        let mut log = PartitionLog::new();
        let mut last_applied = LogId::default();
        let mut snapshot_meta = None;

        if let Some(bytes) = persistence.read("snapshot").await? {
            let (meta, snapshot_bytes): (SnapshotMeta, Vec<u8>) = serde_json::from_slice(&bytes)?;
            state_machine.restore(&snapshot_bytes)?;
            last_applied = meta.last_log_id;
            log.compact(meta.last_log_id);
            snapshot_meta = Some(meta);
        }

        if let Some(bytes) = persistence.read("log").await? {
            let persisted: PersistedLog = serde_json::from_slice(&bytes)?;
            if !persisted.entries.is_empty() {
                log.append(&persisted.entries)?;
            }
            log.set_commit_index(persisted.commit_index.max(log.commit_index()));
        }

        let membership = scan_membership(&log, id, snapshot_meta.as_ref());

        Ok(Self {
            id,
            persistence,
            inner: RwLock::new(Inner { log, hard_state, membership, last_applied, state_machine, snapshot_meta }),
        })
    }

    async fn persist_log(&self, log: &PartitionLog<ClientRequest>) -> anyhow::Result<()> {
        let entries = log.get_range(log.first_index(), log.last_index() + 1);
        let persisted = PersistedLog { entries, commit_index: log.commit_index() };
        let bytes = serde_json::to_vec(&persisted)?;
        self.persistence.write("log", &bytes).await
    }

    /// Directly splice an entry into the log, overwriting any conflicting suffix.
    ///
    /// Exists for tests that need to simulate a replica crashing mid-way through a joint-consensus
    /// membership change, which can't be reached through the public `RaftStorage` surface alone.
    pub async fn debug_insert_log_entry(&self, entry: Entry<ClientRequest>) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        if let EntryPayload::ConfigChange(change) = &entry.payload {
            inner.membership = change.membership.clone();
        }
        inner.log.insert_overwriting(entry)?;
        self.persist_log(&inner.log).await
    }
}

fn scan_membership<D: atomix_raft::AppData>(log: &PartitionLog<D>, id: NodeId, snapshot: Option<&SnapshotMeta>) -> MembershipConfig {
    for index in (log.first_index()..=log.last_index()).rev() {
        if let Some(entry) = log.get(index) {
            if let EntryPayload::ConfigChange(change) = &entry.payload {
                return change.membership.clone();
            }
        }
    }
    match snapshot {
        Some(meta) => meta.membership.clone(),
        None => MembershipConfig::new_initial(id),
    }
}

/// An in-memory buffer used as the `SnapshotData` associated type: snapshots are small enough
/// (bounded by the state machine's own `backup()` output) that streaming them through a real file
/// handle buys nothing a `Vec<u8>` doesn't already give a test harness or a single-node deploy.
#[derive(Default)]
pub struct SnapshotBuffer {
    cursor: io::Cursor<Vec<u8>>,
}

impl SnapshotBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { cursor: io::Cursor::new(bytes) }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl AsyncRead for SnapshotBuffer {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let n = io::Read::read(&mut self.cursor, buf.initialize_unfilled())?;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for SnapshotBuffer {
    fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(io::Write::write(&mut self.cursor, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for SnapshotBuffer {
    fn start_seek(mut self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        io::Seek::seek(&mut self.cursor, position).map(|_| ())
    }

    fn poll_complete(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(io::Seek::stream_position(&mut self.cursor))
    }
}

/// Thrown from `apply_to_state_machine` if the state machine itself ever panics; in practice
/// primitive services are expected to return `Response::Error` rather than panic, so this variant
/// exists only to satisfy `RaftStorage::ShutdownError`'s bound.
#[derive(Debug, thiserror::Error)]
#[error("state machine apply failed: {0}")]
pub struct ApplyError(pub String);

#[async_trait]
impl<SM: StateMachine> RaftStorage<ClientRequest, ClientResponse> for AtomixStore<SM> {
    type SnapshotData = SnapshotBuffer;
    type ShutdownError = ApplyError;

    async fn get_membership_config(&self) -> anyhow::Result<MembershipConfig> {
        Ok(self.inner.read().await.membership.clone())
    }

    async fn get_initial_state(&self) -> anyhow::Result<InitialState> {
        let inner = self.inner.read().await;
        let last_log_id = {
            let last_index = inner.log.last_index();
            let term = inner.log.term(last_index).unwrap_or(0);
            LogId::new(term, last_index)
        };
        Ok(InitialState {
            last_log_id,
            last_applied_log: inner.last_applied,
            hard_state: inner.hard_state.clone(),
            membership: inner.membership.clone(),
        })
    }

    async fn save_hard_state(&self, hs: &HardState) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(hs)?;
        self.persistence.write("hard-state", &bytes).await?;
        self.inner.write().await.hard_state = hs.clone();
        Ok(())
    }

    async fn get_log_entries<RNG>(&self, range: RNG) -> anyhow::Result<Vec<Entry<ClientRequest>>>
    where RNG: std::ops::RangeBounds<u64> + Clone + std::fmt::Debug + Send + Sync {
        use std::ops::Bound;
        let inner = self.inner.read().await;
        let from = match range.start_bound() {
            Bound::Included(i) => *i,
            Bound::Excluded(i) => *i + 1,
            Bound::Unbounded => inner.log.first_index(),
        };
        let to = match range.end_bound() {
            Bound::Included(i) => *i + 1,
            Bound::Excluded(i) => *i,
            Bound::Unbounded => inner.log.last_index() + 1,
        };
        Ok(inner.log.get_range(from, to))
    }

    async fn try_get_log_entry(&self, log_index: u64) -> anyhow::Result<Option<Entry<ClientRequest>>> {
        Ok(self.inner.read().await.log.get(log_index).cloned())
    }

    async fn get_last_log_id(&self) -> anyhow::Result<LogId> {
        let inner = self.inner.read().await;
        let last_index = inner.log.last_index();
        if last_index < inner.last_applied.index {
            return Ok(inner.last_applied);
        }
        let term = inner.log.term(last_index).unwrap_or(inner.last_applied.term);
        Ok(LogId::new(term, last_index))
    }

    async fn delete_logs_from<RNG>(&self, range: RNG) -> anyhow::Result<()>
    where RNG: std::ops::RangeBounds<u64> + Clone + std::fmt::Debug + Send + Sync {
        use std::ops::Bound;
        let mut inner = self.inner.write().await;
        let from = match range.start_bound() {
            Bound::Included(i) => *i,
            Bound::Excluded(i) => *i + 1,
            Bound::Unbounded => inner.log.first_index(),
        };
        inner.log.truncate_after(from.saturating_sub(1))?;
        let log_snapshot = &inner.log;
        self.persist_log(log_snapshot).await
    }

    async fn append_to_log(&self, entries: &[&Entry<ClientRequest>]) -> anyhow::Result<()> {
        let owned: Vec<Entry<ClientRequest>> = entries.iter().map(|e| (*e).clone()).collect();
        let mut inner = self.inner.write().await;
        for entry in &owned {
            if let EntryPayload::ConfigChange(change) = &entry.payload {
                inner.membership = change.membership.clone();
            }
        }
        inner.log.append(&owned)?;
        self.persist_log(&inner.log).await
    }

    async fn apply_to_state_machine(&self, entries: &[&Entry<ClientRequest>]) -> anyhow::Result<Vec<ClientResponse>> {
        let mut inner = self.inner.write().await;
        let mut responses = Vec::with_capacity(entries.len());
        for entry in entries {
            inner.log.set_commit_index(inner.log.commit_index().max(entry.log_id.index));
            let response = match &entry.payload {
                EntryPayload::Normal(normal) => {
                    let role = atomix_primitives::ReplicaRole::Follower;
                    inner.state_machine.apply(entry.log_id.index, entry.timestamp, role, normal.data.clone())
                }
                EntryPayload::ConfigChange(_) | EntryPayload::Blank | EntryPayload::PurgedMarker => {
                    ClientResponse::Acked
                }
            };
            inner.last_applied = entry.log_id;
            responses.push(response);
        }
        Ok(responses)
    }

    async fn do_log_compaction(&self) -> anyhow::Result<Snapshot<Self::SnapshotData>> {
        let mut inner = self.inner.write().await;
        if !inner.state_machine.can_delete(inner.last_applied.index) {
            anyhow::bail!("state machine vetoed compaction at index {}", inner.last_applied.index);
        }
        let bytes = inner.state_machine.backup();
        let meta = SnapshotMeta {
            last_log_id: inner.last_applied,
            membership: inner.membership.clone(),
            snapshot_id: new_snapshot_id(inner.last_applied),
        };
        let envelope = serde_json::to_vec(&(meta.clone(), bytes.clone()))?;
        self.persistence.write("snapshot", &envelope).await?;
        inner.log.compact(inner.last_applied);
        inner.snapshot_meta = Some(meta.clone());
        self.persist_log(&inner.log).await?;
        Ok(Snapshot { meta, snapshot: Box::new(SnapshotBuffer::new(bytes)) })
    }

    async fn begin_receiving_snapshot(&self) -> anyhow::Result<Box<Self::SnapshotData>> {
        Ok(Box::new(SnapshotBuffer::default()))
    }

    async fn finalize_snapshot_installation(&self, meta: &SnapshotMeta, snapshot: Box<Self::SnapshotData>) -> anyhow::Result<()> {
        let bytes = snapshot.into_inner();
        let mut inner = self.inner.write().await;
        inner.state_machine.restore(&bytes)?;
        inner.last_applied = meta.last_log_id;
        inner.membership = meta.membership.clone();
        inner.log.compact(meta.last_log_id);
        inner.snapshot_meta = Some(meta.clone());
        let envelope = serde_json::to_vec(&(meta.clone(), bytes))?;
        self.persistence.write("snapshot", &envelope).await?;
        self.persist_log(&inner.log).await
    }

    async fn get_current_snapshot(&self) -> anyhow::Result<Option<Snapshot<Self::SnapshotData>>> {
        let bytes = match self.persistence.read("snapshot").await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let (meta, snapshot_bytes): (SnapshotMeta, Vec<u8>) = serde_json::from_slice(&bytes)?;
        Ok(Some(Snapshot { meta, snapshot: Box::new(SnapshotBuffer::new(snapshot_bytes)) }))
    }
}

/// A debug-only snapshot of state-machine-adjacent bookkeeping that doesn't belong on the
/// `StateMachine` trait itself (it's storage's business, not the service host's).
#[derive(Clone, Debug, Default)]
pub struct StorageDebugState {
    pub last_applied_log: LogId,
}

#[async_trait]
impl<SM: StateMachine> RaftStorageDebug<StorageDebugState> for AtomixStore<SM> {
    async fn get_state_machine(&self) -> StorageDebugState {
        StorageDebugState { last_applied_log: self.inner.read().await.last_applied }
    }

    async fn read_hard_state(&self) -> Option<HardState> {
        Some(self.inner.read().await.hard_state.clone())
    }
}

fn new_snapshot_id(log_id: LogId) -> SnapshotId {
    format!("{}-{}", log_id.term, log_id.index)
}
