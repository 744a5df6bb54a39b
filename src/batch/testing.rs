//! Fakes shared by the batch tests.

use crate::batch::endpoint::{EndpointError, InferenceEndpoint};
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::duckdb_store::DuckDbStore;
use crate::db::queries::Tables;
use crate::db::ConversionStore;
use async_trait::async_trait;
use r2d2::Pool;
use serde_json::Value;
use std::sync::Mutex;

/// Replays canned outcomes in order, then answers with empty text.
pub struct Scripted {
    outcomes: Mutex<Vec<Result<String, EndpointError>>>,
    payloads: Mutex<Vec<Value>>,
}

impl Scripted {
    pub fn new(mut outcomes: Vec<Result<String, EndpointError>>) -> Self {
        outcomes.reverse();
        Self {
            outcomes: Mutex::new(outcomes),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.payloads.lock().unwrap().len() as u32
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceEndpoint for Scripted {
    async fn call(&self, payload: &Value) -> Result<String, EndpointError> {
        self.payloads.lock().unwrap().push(payload.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

pub fn server_error() -> EndpointError {
    EndpointError::Status {
        status: 500,
        body: "Internal Server Error".to_string(),
    }
}

pub async fn memory_store() -> DuckDbStore {
    let manager = DuckDBConnectionManager::new(":memory:").unwrap();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    let store = DuckDbStore::checkout(&pool, Tables::new("sql_obj_dtl", "sql_chg_result").unwrap())
        .await
        .unwrap();
    store.ensure_schema().await.unwrap();
    store
}
