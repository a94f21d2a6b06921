//! Leader election: a FIFO queue of candidate sessions, one of which holds "leadership" at a
//! time. Leadership is released the moment the holding session closes or expires, same as
//! `lock.rs`, and the next queued candidate is promoted.

use std::collections::VecDeque;

use serde::Deserialize;
use serde::Serialize;

use crate::service::ApplyResult;
use crate::service::PrimitiveService;
use crate::service::ServiceContext;
use crate::service::ServiceError;
use crate::session::SessionId;

#[derive(Default)]
pub struct LeaderElection {
    leader: Option<SessionId>,
    candidates: VecDeque<SessionId>,
}

#[derive(Serialize, Deserialize)]
pub enum ElectionCommand {
    Enter,
    Withdraw,
}

#[derive(Serialize, Deserialize)]
pub enum ElectionQuery {
    Leader,
    Candidates,
}

#[derive(Serialize, Deserialize)]
pub enum ElectionResult {
    Term { leader: Option<SessionId>, candidates: Vec<SessionId> },
}

impl LeaderElection {
    fn promote_if_vacant(&mut self) {
        if self.leader.is_none() {
            self.leader = self.candidates.pop_front();
        }
    }

    fn term(&self) -> ElectionResult {
        ElectionResult::Term { leader: self.leader, candidates: self.candidates.iter().copied().collect() }
    }
}

impl PrimitiveService for LeaderElection {
    fn service_type(&self) -> &'static str {
        "leader-election"
    }

    fn apply_command(&mut self, ctx: ServiceContext, command: &[u8]) -> Result<ApplyResult, ServiceError> {
        let command: ElectionCommand = serde_json::from_slice(command)?;
        let session = ctx.session.ok_or_else(|| ServiceError::Command("election requires a session".into()))?;

        match command {
            ElectionCommand::Enter => {
                if self.leader != Some(session) && !self.candidates.contains(&session) {
                    self.candidates.push_back(session);
                }
                self.promote_if_vacant();
            }
            ElectionCommand::Withdraw => {
                self.on_session_end(session);
            }
        }

        Ok(ApplyResult::response(serde_json::to_vec(&self.term())?))
    }

    fn apply_query(&self, _ctx: ServiceContext, query: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let query: ElectionQuery = serde_json::from_slice(query)?;
        let result = match query {
            ElectionQuery::Leader => ElectionResult::Term { leader: self.leader, candidates: Vec::new() },
            ElectionQuery::Candidates => self.term(),
        };
        Ok(serde_json::to_vec(&result)?)
    }

    fn backup(&self) -> Vec<u8> {
        serde_json::to_vec(&(self.leader, self.candidates.iter().copied().collect::<Vec<_>>())).expect("election state is serializable")
    }

    fn restore(&mut self, bytes: &[u8]) {
        let (leader, candidates): (Option<SessionId>, Vec<SessionId>) = serde_json::from_slice(bytes).expect("corrupt election snapshot");
        self.leader = leader;
        self.candidates = candidates.into();
    }

    fn on_session_end(&mut self, session: SessionId) {
        self.candidates.retain(|id| *id != session);
        if self.leader == Some(session) {
            self.leader = None;
            self.promote_if_vacant();
        }
    }
}
