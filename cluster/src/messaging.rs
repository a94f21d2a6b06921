//! The Messaging Plane (§4.6): request/response and streaming RPC between replicas and between
//! client and replica, with cancellation, per-RPC timeouts, and stale-envelope discard.
//!
//! Wire transport is pluggable (§1 "on-wire serializer choice ... out of scope"): this module
//! only fixes the *shape* of an RPC — a typed request carried in an [`Envelope`] that tags the
//! sender's term and leader belief, sent to a [`NodeId`] with a deadline, and a streaming variant
//! used for `InstallSnapshot` chunks and session event replay. Production deployments plug in a
//! concrete [`MessagingPlane`]; [`LoopbackPlane`] is the in-process implementation used by tests
//! and by single-process demos, mirroring the role `RaftRouter` plays in the Raft crate's own
//! test fixtures.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atomix_primitives::Command;
use atomix_primitives::Response;
use atomix_raft::raft::AppendEntriesRequest;
use atomix_raft::raft::AppendEntriesResponse;
use atomix_raft::raft::InstallSnapshotRequest;
use atomix_raft::raft::InstallSnapshotResponse;
use atomix_raft::raft::VoteRequest;
use atomix_raft::raft::VoteResponse;
use atomix_raft::NodeId;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Notify;
use tokio::time::timeout;

/// A monotonically increasing identifier for an in-flight request, unique per [`MessagingPlane`]
/// instance. Used to correlate a cancellation with the request it targets.
pub type RequestId = u64;

/// The core RPC bodies carried over the messaging plane (§6 Wire RPCs).
///
/// `SubmitCommand`/`OpenSession`/`KeepAlive`/`CloseSession`/`Query` all travel as [`Command`]
/// values; the partition router is the only caller that ever constructs one of those variants
/// directly, so they are folded into a single `Client` case here rather than one per subtype.
#[derive(Debug, Serialize, Deserialize)]
pub enum OutboundMessage {
    AppendEntries(AppendEntriesRequest<Command>),
    Vote(VoteRequest),
    InstallSnapshot(InstallSnapshotRequest),
    Client(Command),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum InboundMessage {
    AppendEntries(AppendEntriesResponse),
    Vote(VoteResponse),
    InstallSnapshot(InstallSnapshotResponse),
    Client(Response),
}

/// Envelope wrapping a message body with the sender's term and leader belief, so a receiver can
/// discard a reply that arrived from a replica that has since lost its leadership (§4.6: "stale
/// leader replies are discarded").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub term: u64,
    pub leader_at_send: Option<NodeId>,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(term: u64, leader_at_send: Option<NodeId>, body: T) -> Self {
        Self { term, leader_at_send, body }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("no route to node {0}")]
    Unreachable(NodeId),
    #[error("request to node {0} timed out")]
    Timeout(NodeId),
    #[error("request was cancelled")]
    Cancelled,
    #[error("peer returned a stale envelope (term {received} < {expected})")]
    StaleEnvelope { expected: u64, received: u64 },
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// A single chunk of a server-push stream, used for `InstallSnapshot` segments and replayed
/// session events (§4.6 Streaming).
pub type StreamReceiver<T> = mpsc::Receiver<T>;

/// A handle to an in-flight request. Dropping it — or calling [`RequestHandle::cancel`]
/// explicitly — best-effort informs the peer that the caller is no longer interested (§4.6:
/// "cancelling the future informs the peer if the request is inflight"); per §5 this is only a
/// hint, since the peer may already have committed the entry by the time cancellation arrives.
pub struct RequestHandle {
    id: RequestId,
    cancelled: Arc<Notify>,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.notify_waiters();
    }
}

/// The messaging plane's public surface: send one RPC and await its reply, or open a push stream.
///
/// Implementations must enforce `timeout` themselves (or rely on [`LoopbackPlane`]'s helper) and
/// must never dedupe retries — per §4.6, delivery is at-most-once per attempt and deduplication is
/// the session manager's job, not the transport's.
#[async_trait]
pub trait MessagingPlane: Send + Sync + 'static {
    async fn send(
        &self,
        target: NodeId,
        envelope: Envelope<OutboundMessage>,
        deadline: Duration,
    ) -> Result<Envelope<InboundMessage>, MessagingError>;

    /// Open a bounded push stream to `target`, used for snapshot chunk transfer or session event
    /// replay. The returned receiver yields `None` once the peer marks the stream `done`.
    fn open_stream(&self, target: NodeId, envelope: Envelope<OutboundMessage>) -> StreamReceiver<Envelope<InboundMessage>>;
}

/// A handler a node registers with a [`LoopbackPlane`] to receive inbound RPCs addressed to it.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, from: NodeId, envelope: Envelope<OutboundMessage>) -> Result<Envelope<InboundMessage>, MessagingError>;

    /// Serve a streamed RPC (snapshot install, session event replay) by pushing chunks to `tx`.
    /// The default implementation serves nothing, for handlers with no streaming RPCs.
    async fn handle_stream(&self, _from: NodeId, _envelope: Envelope<OutboundMessage>, _tx: mpsc::Sender<Envelope<InboundMessage>>) {}
}

/// An in-process [`MessagingPlane`] that dispatches directly to registered [`MessageHandler`]s.
///
/// This is the messaging-plane analogue of `RaftRouter` in the Raft crate's own test fixtures:
/// every "send" is really a direct async call, with an optional artificial delay and per-node
/// isolation so failure scenarios (partitions, slow links) can be exercised without a real
/// socket. It is also adequate for a single-process deployment that hosts every partition replica
/// in one binary.
#[derive(Default)]
pub struct LoopbackPlane {
    handlers: AsyncMutex<BTreeMap<NodeId, Arc<dyn MessageHandler>>>,
    isolated: AsyncMutex<std::collections::BTreeSet<NodeId>>,
    next_request_id: AtomicU64,
    send_delay: Duration,
}

impl LoopbackPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_send_delay(send_delay: Duration) -> Self {
        Self { send_delay, ..Self::default() }
    }

    pub async fn register(&self, node: NodeId, handler: Arc<dyn MessageHandler>) {
        self.handlers.lock().await.insert(node, handler);
    }

    pub async fn unregister(&self, node: NodeId) {
        self.handlers.lock().await.remove(&node);
    }

    /// Isolate `node`: sends to or from it fail as [`MessagingError::Unreachable`] until restored.
    pub async fn isolate(&self, node: NodeId) {
        self.isolated.lock().await.insert(node);
    }

    pub async fn restore(&self, node: NodeId) {
        self.isolated.lock().await.remove(&node);
    }

    async fn is_isolated(&self, node: NodeId) -> bool {
        self.isolated.lock().await.contains(&node)
    }

    fn next_request_id(&self) -> RequestId {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl MessagingPlane for LoopbackPlane {
    async fn send(
        &self,
        target: NodeId,
        envelope: Envelope<OutboundMessage>,
        deadline: Duration,
    ) -> Result<Envelope<InboundMessage>, MessagingError> {
        let request_id = self.next_request_id();
        tracing::trace!(request_id, target, "dispatching message over loopback plane");
        if self.is_isolated(target).await {
            return Err(MessagingError::Unreachable(target));
        }
        let handler = self.handlers.lock().await.get(&target).cloned().ok_or(MessagingError::Unreachable(target))?;

        if !self.send_delay.is_zero() {
            let jitter = rand::random::<u64>() % (self.send_delay.as_millis() as u64).max(1);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        timeout(deadline, handler.handle(0, envelope)).await.map_err(|_| MessagingError::Timeout(target))?
    }

    fn open_stream(&self, target: NodeId, envelope: Envelope<OutboundMessage>) -> StreamReceiver<Envelope<InboundMessage>> {
        let (tx, rx) = mpsc::channel(16);
        let handlers = self.handlers.try_lock().ok().and_then(|h| h.get(&target).cloned());
        if let Some(handler) = handlers {
            tokio::spawn(async move { handler.handle_stream(0, envelope, tx).await });
        }
        rx
    }
}

/// A [`RequestHandle`] paired with the future driving the request, for callers that want
/// cancellation support without hand-rolling the `Notify` plumbing each time.
pub fn spawn_cancellable<F>(id: RequestId, fut: F) -> (RequestHandle, oneshot::Receiver<Result<Envelope<InboundMessage>, MessagingError>>)
where F: std::future::Future<Output = Result<Envelope<InboundMessage>, MessagingError>> + Send + 'static {
    let cancelled = Arc::new(Notify::new());
    let (tx, rx) = oneshot::channel();
    let notify = cancelled.clone();
    tokio::spawn(async move {
        let result = tokio::select! {
            res = fut => res,
            _ = notify.notified() => Err(MessagingError::Cancelled),
        };
        let _ = tx.send(result);
    });
    (RequestHandle { id, cancelled }, rx)
}
