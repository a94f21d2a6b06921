//! Adapters binding [`crate::messaging`]'s transport-agnostic plane to `atomix_raft`'s
//! [`RaftNetwork`] trait (client side) and to a running [`Raft`] handle (server side).

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atomix_primitives::Command;
use atomix_primitives::Response;
use atomix_primitives::StateMachine;
use atomix_raft::raft::AppendEntriesRequest;
use atomix_raft::raft::AppendEntriesResponse;
use atomix_raft::raft::InstallSnapshotRequest;
use atomix_raft::raft::InstallSnapshotResponse;
use atomix_raft::raft::VoteRequest;
use atomix_raft::raft::VoteResponse;
use atomix_raft::NodeId;
use atomix_raft::Raft;
use atomix_raft::RaftNetwork;
use atomix_raft_store::AtomixStore;

use crate::messaging::Envelope;
use crate::messaging::InboundMessage;
use crate::messaging::MessageHandler;
use crate::messaging::MessagingError;
use crate::messaging::MessagingPlane;
use crate::messaging::OutboundMessage;

/// A [`RaftNetwork`] implementation that carries `atomix-raft`'s own RPCs over a
/// [`MessagingPlane`], so every inter-replica send passes through the same transport, envelope
/// tagging, and deadline handling a client's `SubmitCommand` does (§4.6).
pub struct MessagingNetwork<P: MessagingPlane> {
    self_id: NodeId,
    plane: Arc<P>,
    rpc_timeout: Duration,
}

impl<P: MessagingPlane> MessagingNetwork<P> {
    pub fn new(self_id: NodeId, plane: Arc<P>, rpc_timeout: Duration) -> Self {
        Self { self_id, plane, rpc_timeout }
    }
}

#[async_trait]
impl<P: MessagingPlane> RaftNetwork<Command> for MessagingNetwork<P> {
    async fn send_append_entries(
        &self,
        target: NodeId,
        rpc: AppendEntriesRequest<Command>,
    ) -> anyhow::Result<AppendEntriesResponse> {
        let envelope = Envelope::new(rpc.term, Some(self.self_id), OutboundMessage::AppendEntries(rpc));
        let reply = self.plane.send(target, envelope, self.rpc_timeout).await?;
        match reply.body {
            InboundMessage::AppendEntries(resp) => Ok(resp),
            other => anyhow::bail!("expected AppendEntries reply, got {:?}", std::mem::discriminant(&other)),
        }
    }

    async fn send_install_snapshot(&self, target: NodeId, rpc: InstallSnapshotRequest) -> anyhow::Result<InstallSnapshotResponse> {
        let envelope = Envelope::new(rpc.term, Some(self.self_id), OutboundMessage::InstallSnapshot(rpc));
        let reply = self.plane.send(target, envelope, self.rpc_timeout).await?;
        match reply.body {
            InboundMessage::InstallSnapshot(resp) => Ok(resp),
            other => anyhow::bail!("expected InstallSnapshot reply, got {:?}", std::mem::discriminant(&other)),
        }
    }

    async fn send_vote(&self, target: NodeId, rpc: VoteRequest) -> anyhow::Result<VoteResponse> {
        let envelope = Envelope::new(rpc.term, Some(self.self_id), OutboundMessage::Vote(rpc));
        let reply = self.plane.send(target, envelope, self.rpc_timeout).await?;
        match reply.body {
            InboundMessage::Vote(resp) => Ok(resp),
            other => anyhow::bail!("expected Vote reply, got {:?}", std::mem::discriminant(&other)),
        }
    }
}

/// The server side of a partition replica: wraps a running [`Raft`] handle and serves inbound
/// RPCs addressed to it over the messaging plane, including client `Command`s, which it forwards
/// to `Raft::client_write`/a query path (§4.5 data flow: "leader appends to log, replicates, on
/// commit → Raft hands entry to Primitive Service Host").
pub struct PartitionReplica<P: MessagingPlane, SM: StateMachine = atomix_primitives::PrimitiveHost> {
    pub id: NodeId,
    pub raft: Raft<Command, Response, MessagingNetwork<P>, AtomixStore<SM>>,
    _sm: PhantomData<SM>,
}

impl<P: MessagingPlane, SM: StateMachine> PartitionReplica<P, SM> {
    pub fn new(id: NodeId, raft: Raft<Command, Response, MessagingNetwork<P>, AtomixStore<SM>>) -> Self {
        Self { id, raft, _sm: PhantomData }
    }
}

#[async_trait]
impl<P: MessagingPlane, SM: StateMachine> MessageHandler for PartitionReplica<P, SM> {
    async fn handle(&self, _from: NodeId, envelope: Envelope<OutboundMessage>) -> Result<Envelope<InboundMessage>, MessagingError> {
        let term = envelope.term;
        match envelope.body {
            OutboundMessage::AppendEntries(rpc) => {
                let resp = self.raft.append_entries(rpc).await.map_err(|e| MessagingError::Transport(e.into()))?;
                Ok(Envelope::new(resp.term, Some(self.id), InboundMessage::AppendEntries(resp)))
            }
            OutboundMessage::Vote(rpc) => {
                let resp = self.raft.vote(rpc).await.map_err(|e| MessagingError::Transport(e.into()))?;
                Ok(Envelope::new(resp.term, Some(self.id), InboundMessage::Vote(resp)))
            }
            OutboundMessage::InstallSnapshot(rpc) => {
                let resp = self.raft.install_snapshot(rpc).await.map_err(|e| MessagingError::Transport(e.into()))?;
                Ok(Envelope::new(resp.term, Some(self.id), InboundMessage::InstallSnapshot(resp)))
            }
            OutboundMessage::Client(command) => {
                use atomix_raft::raft::ClientWriteRequest;
                match self.raft.client_write(ClientWriteRequest::new(command)).await {
                    Ok(resp) => Ok(Envelope::new(term, Some(self.id), InboundMessage::Client(resp.data))),
                    Err(atomix_raft::ClientWriteError::ForwardToLeader(_, hint)) => {
                        Ok(Envelope::new(term, hint, InboundMessage::Client(Response::Error(atomix_primitives::AtomixError::NotLeader { hint }))))
                    }
                    Err(atomix_raft::ClientWriteError::RaftError(_)) => {
                        Ok(Envelope::new(term, None, InboundMessage::Client(Response::Error(atomix_primitives::AtomixError::Unavailable))))
                    }
                }
            }
        }
    }
}
