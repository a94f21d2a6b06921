//! Wires the session manager and the service registry into the single deterministic state
//! machine a partition's Raft replica applies committed entries against (§4.3, §4.4).

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::command::AtomixError;
use crate::command::Command;
use crate::command::Response;
use crate::service::ApplyResult;
use crate::service::PrimitiveService;
use crate::service::ReplicaRole;
use crate::service::ServiceContext;
use crate::service::ServiceRegistry;
use crate::session::ApplyOutcome;
use crate::session::SessionManager;

/// The state machine a `RaftStorage` implementation drives via `apply_to_state_machine`.
///
/// Kept free of any Raft- or storage-specific types so `atomix-raft-store` can depend on this
/// crate without this crate depending back on it.
pub trait StateMachine: Send + Sync + 'static {
    /// Apply one committed log entry. `index` and `timestamp` come from the entry itself, so every
    /// replica sees the identical context.
    fn apply(&mut self, index: u64, timestamp: i64, role: ReplicaRole, command: Command) -> Response;

    /// Serve a query without appending a log entry.
    fn apply_query(&self, timestamp: i64, command: Command) -> Response;

    /// Veto compaction past `index` if any hosted service still needs it.
    fn can_delete(&self, index: u64) -> bool;

    /// Serialize the full state for a partition snapshot.
    fn backup(&self) -> Vec<u8>;

    /// Replace the full state from a previously captured snapshot.
    fn restore(&mut self, bytes: &[u8]) -> anyhow::Result<()>;
}

struct ServiceInstance {
    service_type: String,
    service: Box<dyn PrimitiveService>,
}

/// The default [`StateMachine`]: a session table plus a directory of named service instances.
///
/// A service is instantiated lazily, the first time a session names it in `OpenSession`; this
/// mirrors the host's "load a service by `ServiceType`" behavior (§4.4) without requiring every
/// possible service to be constructed up front.
pub struct PrimitiveHost {
    registry: ServiceRegistry,
    sessions: SessionManager,
    services: BTreeMap<String, ServiceInstance>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    sessions: Vec<u8>,
    services: Vec<(String, String, Vec<u8>)>,
}

impl PrimitiveHost {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry,
            sessions: SessionManager::new(),
            services: BTreeMap::new(),
        }
    }

    fn service_context(&self, index: u64, timestamp: i64, role: ReplicaRole, session_id: Option<u64>) -> ServiceContext {
        ServiceContext { index, timestamp, role, session: session_id }
    }

    fn apply_submit(
        &mut self,
        index: u64,
        timestamp: i64,
        role: ReplicaRole,
        session_id: u64,
        sequence: u64,
        payload: Vec<u8>,
    ) -> Response {
        let outcome = match self.sessions.classify(session_id, sequence) {
            Ok(outcome) => outcome,
            Err(err) => return Response::Error(err.into()),
        };

        match outcome {
            ApplyOutcome::Cached(payload) => Response::Result { payload },
            ApplyOutcome::OutOfOrder => Response::Error(AtomixError::IllegalState(format!(
                "session {} received sequence {} out of order",
                session_id, sequence
            ))),
            ApplyOutcome::Apply => {
                let service_name = match self.sessions.get(session_id) {
                    Ok(session) => session.service_name.clone(),
                    Err(err) => return Response::Error(err.into()),
                };
                let instance = match self.services.get_mut(&service_name) {
                    Some(instance) => instance,
                    None => {
                        return Response::Error(AtomixError::IllegalState(format!(
                            "service '{}' has no loaded instance",
                            service_name
                        )))
                    }
                };

                let ctx = self.service_context(index, timestamp, role, Some(session_id));
                let ApplyResult { response, events } = match instance.service.apply_command(ctx, &payload) {
                    Ok(result) => result,
                    Err(err) => return Response::Error(err.into()),
                };

                if let Err(err) = self.sessions.record_result(session_id, sequence, response.clone()) {
                    return Response::Error(err.into());
                }
                if let Ok(session) = self.sessions.get_mut(session_id) {
                    for event in events {
                        session.emit_event(index, event);
                    }
                }

                Response::Result { payload: response }
            }
        }
    }
}

impl StateMachine for PrimitiveHost {
    fn apply(&mut self, index: u64, timestamp: i64, role: ReplicaRole, command: Command) -> Response {
        let response = match command {
            Command::OpenSession { member_id, service_type, service_name, timeout_ms } => {
                if !self.services.contains_key(&service_name) {
                    let service = match self.registry.create(&service_type) {
                        Some(service) => service,
                        None => {
                            return Response::Error(AtomixError::ProtocolMismatch(format!(
                                "unknown service type '{}'",
                                service_type
                            )))
                        }
                    };
                    self.services.insert(service_name.clone(), ServiceInstance { service_type: service_type.clone(), service });
                }
                let session_id = self.sessions.open_session(member_id, service_name, timeout_ms, timestamp);
                Response::SessionOpened { session_id }
            }
            Command::KeepAlive { session_id, command_sequence_ack, event_index_ack } => {
                match self.sessions.keep_alive(session_id, command_sequence_ack, event_index_ack, timestamp) {
                    Ok(()) => Response::Acked,
                    Err(err) => Response::Error(err.into()),
                }
            }
            Command::CloseSession { session_id } => match self.sessions.close_session(session_id) {
                Ok(session) => {
                    if let Some(instance) = self.services.get_mut(&session.service_name) {
                        instance.service.on_session_end(session_id);
                    }
                    Response::SessionClosed
                }
                Err(err) => Response::Error(err.into()),
            },
            Command::Submit { session_id, sequence, payload } => self.apply_submit(index, timestamp, role, session_id, sequence, payload),
            Command::Query { session_id, service_name, payload } => {
                let ctx = self.service_context(index, timestamp, role, session_id);
                match self.services.get(&service_name) {
                    Some(instance) => match instance.service.apply_query(ctx, &payload) {
                        Ok(payload) => Response::Result { payload },
                        Err(err) => Response::Error(err.into()),
                    },
                    None => Response::Error(AtomixError::IllegalState(format!("service '{}' has no loaded instance", service_name))),
                }
            }
        };

        for expired in self.sessions.expire(timestamp) {
            if let Some(instance) = self.services.get_mut(&expired.service_name) {
                instance.service.on_session_end(expired.id);
            }
            tracing::debug!(session = expired.id, index, "session expired");
        }

        response
    }

    fn apply_query(&self, timestamp: i64, command: Command) -> Response {
        match command {
            Command::Query { session_id, service_name, payload } => {
                let ctx = self.service_context(0, timestamp, ReplicaRole::Follower, session_id);
                match self.services.get(&service_name) {
                    Some(instance) => match instance.service.apply_query(ctx, &payload) {
                        Ok(payload) => Response::Result { payload },
                        Err(err) => Response::Error(err.into()),
                    },
                    None => Response::Error(AtomixError::IllegalState(format!("service '{}' has no loaded instance", service_name))),
                }
            }
            _ => Response::Error(AtomixError::IllegalState("only Query commands may be applied as reads".into())),
        }
    }

    fn can_delete(&self, index: u64) -> bool {
        self.services.values().all(|instance| instance.service.can_delete(index))
    }

    fn backup(&self) -> Vec<u8> {
        let sessions = serde_json::to_vec(&self.sessions).expect("session table is serializable");
        let services = self
            .services
            .iter()
            .map(|(name, instance)| (name.clone(), instance.service_type.clone(), instance.service.backup()))
            .collect();
        serde_json::to_vec(&SnapshotEnvelope { sessions, services }).expect("snapshot envelope is serializable")
    }

    fn restore(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        let envelope: SnapshotEnvelope = serde_json::from_slice(bytes)?;
        self.sessions = serde_json::from_slice(&envelope.sessions)?;
        self.services.clear();
        for (name, service_type, state) in envelope.services {
            let mut service = self
                .registry
                .create(&service_type)
                .ok_or_else(|| anyhow::anyhow!("unknown service type '{}' in snapshot", service_type))?;
            service.restore(&state);
            self.services.insert(name, ServiceInstance { service_type, service });
        }
        Ok(())
    }
}
