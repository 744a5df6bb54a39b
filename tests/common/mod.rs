#![allow(dead_code)]

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use sqlconv::config::{AppConfig, DatabaseConfig, DbSettings, StoreBackend};
use sqlconv::db::StoreTarget;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One canned answer of the stub inference endpoint.
pub struct StubReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl StubReply {
    pub fn json_response(text: &str) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: json!({ "response": text }).to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: "Internal Server Error".to_string(),
        }
    }
}

#[derive(Default)]
pub struct Stub {
    replies: Mutex<VecDeque<StubReply>>,
    requests: Mutex<Vec<Value>>,
}

impl Stub {
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

async fn answer(State(stub): State<Arc<Stub>>, Json(body): Json<Value>) -> Response {
    stub.requests.lock().unwrap().push(body);
    let reply = stub
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| StubReply::json_response(""));

    (
        StatusCode::from_u16(reply.status).unwrap(),
        [(header::CONTENT_TYPE, reply.content_type)],
        reply.body,
    )
        .into_response()
}

/// Serves `/generate` and `/verify` on an ephemeral port; returns the base URL.
pub async fn spawn_stub(replies: Vec<StubReply>) -> (String, Arc<Stub>) {
    let stub = Arc::new(Stub {
        replies: Mutex::new(replies.into()),
        requests: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/generate", post(answer))
        .route("/verify", post(answer))
        .with_state(Arc::clone(&stub));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), stub)
}

pub fn duckdb_config(dir: &Path) -> AppConfig {
    let defaults = AppConfig::default();
    AppConfig {
        database: DatabaseConfig {
            backend: StoreBackend::Duckdb,
            path: dir.join("sqlconv.duckdb").to_string_lossy().into_owned(),
            ..defaults.database.clone()
        },
        ..defaults
    }
}

pub fn duckdb_target(config: &AppConfig) -> StoreTarget {
    StoreTarget::from_config(&config.database, DbSettings::default()).unwrap()
}
