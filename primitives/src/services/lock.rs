//! A session-scoped mutual-exclusion lock.
//!
//! Lock ownership is tied to the holding session, not the command sequence, so a lost connection
//! (session expiry) releases the lock deterministically on every replica, the same way Raft's own
//! session expiration releases leadership in `election.rs`.

use serde::Deserialize;
use serde::Serialize;

use crate::service::ApplyResult;
use crate::service::PrimitiveService;
use crate::service::ServiceContext;
use crate::service::ServiceError;

#[derive(Default)]
pub struct Lock {
    holder: Option<u64>,
}

#[derive(Serialize, Deserialize)]
pub enum LockCommand {
    /// Attempt to acquire the lock; granted immediately or not at all (no blocking queue).
    TryLock,
    Unlock,
}

#[derive(Serialize, Deserialize)]
pub enum LockQuery {
    IsLocked,
}

#[derive(Serialize, Deserialize)]
pub enum LockResult {
    Granted(bool),
    Bool(bool),
}

impl PrimitiveService for Lock {
    fn service_type(&self) -> &'static str {
        "lock"
    }

    fn apply_command(&mut self, ctx: ServiceContext, command: &[u8]) -> Result<ApplyResult, ServiceError> {
        let command: LockCommand = serde_json::from_slice(command)?;
        let result = match command {
            LockCommand::TryLock => {
                let session = ctx.session.ok_or_else(|| ServiceError::Command("lock requires a session".into()))?;
                let granted = match self.holder {
                    None => {
                        self.holder = Some(session);
                        true
                    }
                    Some(holder) => holder == session,
                };
                LockResult::Granted(granted)
            }
            LockCommand::Unlock => {
                let session = ctx.session.ok_or_else(|| ServiceError::Command("lock requires a session".into()))?;
                if self.holder == Some(session) {
                    self.holder = None;
                }
                LockResult::Bool(true)
            }
        };
        Ok(ApplyResult::response(serde_json::to_vec(&result)?))
    }

    fn apply_query(&self, _ctx: ServiceContext, query: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let LockQuery::IsLocked = serde_json::from_slice(query)?;
        Ok(serde_json::to_vec(&LockResult::Bool(self.holder.is_some()))?)
    }

    fn backup(&self) -> Vec<u8> {
        serde_json::to_vec(&self.holder).expect("option<u64> is serializable")
    }

    fn restore(&mut self, bytes: &[u8]) {
        self.holder = serde_json::from_slice(bytes).expect("corrupt lock snapshot");
    }

    fn on_session_end(&mut self, session: crate::session::SessionId) {
        if self.holder == Some(session) {
            self.holder = None;
        }
    }
}
