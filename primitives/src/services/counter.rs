//! A distributed atomic counter, the simplest possible `PrimitiveService`.

use serde::Deserialize;
use serde::Serialize;

use crate::service::ApplyResult;
use crate::service::PrimitiveService;
use crate::service::ServiceContext;
use crate::service::ServiceError;

#[derive(Default)]
pub struct Counter {
    value: i64,
}

#[derive(Serialize, Deserialize)]
pub enum CounterCommand {
    Increment { delta: i64 },
    Set { value: i64 },
    CompareAndSet { expect: i64, update: i64 },
}

#[derive(Serialize, Deserialize)]
pub enum CounterQuery {
    Get,
}

impl PrimitiveService for Counter {
    fn service_type(&self) -> &'static str {
        "counter"
    }

    fn apply_command(&mut self, _ctx: ServiceContext, command: &[u8]) -> Result<ApplyResult, ServiceError> {
        let command: CounterCommand = serde_json::from_slice(command)?;
        let result = match command {
            CounterCommand::Increment { delta } => {
                self.value += delta;
                self.value
            }
            CounterCommand::Set { value } => {
                self.value = value;
                self.value
            }
            CounterCommand::CompareAndSet { expect, update } => {
                if self.value == expect {
                    self.value = update;
                }
                self.value
            }
        };
        Ok(ApplyResult::response(serde_json::to_vec(&result)?))
    }

    fn apply_query(&self, _ctx: ServiceContext, query: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let CounterQuery::Get = serde_json::from_slice(query)?;
        Ok(serde_json::to_vec(&self.value)?)
    }

    fn backup(&self) -> Vec<u8> {
        serde_json::to_vec(&self.value).expect("i64 is serializable")
    }

    fn restore(&mut self, bytes: &[u8]) {
        self.value = serde_json::from_slice(bytes).expect("corrupt counter snapshot");
    }
}
