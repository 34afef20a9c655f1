//! Deterministic collaborators shared by the integration tests.

#![allow(dead_code)]

use std::{
    net::{SocketAddr, TcpListener},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering}
    },
    time::Duration
};

use async_trait::async_trait;
use axum::{Router, body::Bytes, http::StatusCode};
use sql_query_assistant::{
    error::QueryError,
    executor::SqlExecutor,
    llm::LanguageModel,
    pipeline::QueryPipeline,
    schema::SchemaStore,
    speech::{AudioClip, Transcriber},
    translator::QueryTranslator
};
use tempfile::TempDir;

pub const SCHEMA_T: &str = "CREATE TABLE t(id INTEGER, name TEXT);";

/// Language model that answers from a fixed question → reply table.
pub struct ScriptedModel {
    replies: Vec<(String, String)>,
    calls:   AtomicUsize,
    prompts: Mutex<Vec<String>>
}

impl ScriptedModel {
    pub fn new(replies: &[(&str, &str)]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|(q, r)| (q.to_string(), r.to_string()))
                .collect(),
            calls:   AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .iter()
            .find(|(question, _)| prompt.contains(&format!("\"{}\"", question)))
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| QueryError::Translation("no scripted reply".into()))
    }
}

/// Language model that never answers.
pub struct StalledModel;

#[async_trait]
impl LanguageModel for StalledModel {
    async fn generate(&self, _prompt: &str) -> Result<String, QueryError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(String::new())
    }
}

/// Transcriber that treats the audio bytes as UTF-8 text.
///
/// `"???"` is unintelligible and `"down"` simulates a service outage.
pub struct EchoTranscriber;

#[async_trait]
impl Transcriber for EchoTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, QueryError> {
        let text = String::from_utf8_lossy(&clip.bytes).trim().to_string();
        match text.as_str() {
            "???" => Err(QueryError::NotUnderstood),
            "down" => Err(QueryError::TranscriptionUnavailable("service offline".into())),
            _ => Ok(text)
        }
    }
}

/// Store backed by a fresh file in a temporary directory.
pub fn temp_store() -> (TempDir, Arc<SchemaStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = SchemaStore::open(dir.path().join("live.db"), Duration::from_secs(5)).unwrap();
    (dir, Arc::new(store))
}

pub fn pipeline_with(store: Arc<SchemaStore>, model: Arc<dyn LanguageModel>) -> QueryPipeline {
    QueryPipeline::new(store, QueryTranslator::new(model), SqlExecutor::default())
}

/// Replies used by the canonical scenarios.
pub fn scenario_model() -> Arc<ScriptedModel> {
    Arc::new(ScriptedModel::new(&[
        ("how many rows are in t", "```sql\nSELECT COUNT(*) FROM t;\n```"),
        (
            "insert a row with id 1 and name 'a'",
            "INSERT INTO t (id, name) VALUES (1, 'a');"
        ),
        ("list everything in t", "SELECT id, name FROM t ORDER BY id;"),
        ("drop it all", "DROP TABLE t; DROP TABLE u;"),
        ("break it", "SELEC nonsense FROM t"),
        ("insert a duplicate", "INSERT INTO t (id, name) VALUES (1, 'dup');"),
        ("say nothing", "   ```\n```  ")
    ]))
}

/// Serve `router` on an ephemeral local port.
pub async fn spawn_router(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(router.into_make_service());
    tokio::spawn(server);
    addr
}

/// Base URL of a server answering every request with `status` and `body`.
pub async fn stub_server(status: StatusCode, body: &'static str) -> String {
    let router = Router::new().fallback(move |_request: Bytes| async move {
        (status, [("content-type", "application/json")], body)
    });
    format!("http://{}", spawn_router(router).await)
}

/// Base URL where nothing is listening.
pub fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
