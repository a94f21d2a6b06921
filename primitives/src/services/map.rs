//! A replicated key/value map.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::service::ApplyResult;
use crate::service::PrimitiveService;
use crate::service::ServiceContext;
use crate::service::ServiceError;

#[derive(Default)]
pub struct Map {
    entries: BTreeMap<String, Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
pub enum MapCommand {
    Put { key: String, value: Vec<u8> },
    Remove { key: String },
    Clear,
}

#[derive(Serialize, Deserialize)]
pub enum MapQuery {
    Get { key: String },
    ContainsKey { key: String },
    Size,
}

#[derive(Serialize, Deserialize)]
pub enum MapResult {
    Value(Option<Vec<u8>>),
    Bool(bool),
    Size(usize),
}

impl PrimitiveService for Map {
    fn service_type(&self) -> &'static str {
        "map"
    }

    fn apply_command(&mut self, _ctx: ServiceContext, command: &[u8]) -> Result<ApplyResult, ServiceError> {
        let command: MapCommand = serde_json::from_slice(command)?;
        let result = match command {
            MapCommand::Put { key, value } => MapResult::Value(self.entries.insert(key, value)),
            MapCommand::Remove { key } => MapResult::Value(self.entries.remove(&key)),
            MapCommand::Clear => {
                self.entries.clear();
                MapResult::Bool(true)
            }
        };
        Ok(ApplyResult::response(serde_json::to_vec(&result)?))
    }

    fn apply_query(&self, _ctx: ServiceContext, query: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let query: MapQuery = serde_json::from_slice(query)?;
        let result = match query {
            MapQuery::Get { key } => MapResult::Value(self.entries.get(&key).cloned()),
            MapQuery::ContainsKey { key } => MapResult::Bool(self.entries.contains_key(&key)),
            MapQuery::Size => MapResult::Size(self.entries.len()),
        };
        Ok(serde_json::to_vec(&result)?)
    }

    fn backup(&self) -> Vec<u8> {
        serde_json::to_vec(&self.entries).expect("map is serializable")
    }

    fn restore(&mut self, bytes: &[u8]) {
        self.entries = serde_json::from_slice(bytes).expect("corrupt map snapshot");
    }
}
