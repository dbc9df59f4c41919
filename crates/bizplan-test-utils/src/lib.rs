//! Shared test utilities for bizplan integration tests.
//!
//! - [`FakeOllama`]: an in-process HTTP server that speaks enough of the
//!   Ollama API (`/api/generate`, `/api/tags`) for client and CLI tests.
//! - Fake [`ModelClient`]s with deterministic behaviour.
//! - CSV fixtures.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use bizplan_core::model::{ModelClient, ModelError};
use bizplan_core::record::BusinessRecord;

// ===========================================================================
// Fake Ollama server
// ===========================================================================

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Error { status: u16, message: String },
}

/// Builder for a fake Ollama HTTP server.
#[derive(Debug, Clone)]
pub struct FakeOllama {
    reply: Reply,
    delay: Duration,
}

struct ServerState {
    reply: Reply,
    delay: Duration,
    requests: Mutex<Vec<Value>>,
}

/// A running [`FakeOllama`]. The server shuts down when this is dropped.
pub struct RunningOllama {
    addr: SocketAddr,
    state: Arc<ServerState>,
    _shutdown: oneshot::Sender<()>,
}

impl FakeOllama {
    /// Answer every generate request with `text`.
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: Reply::Text(text.into()),
            delay: Duration::ZERO,
        }
    }

    /// Answer every generate request with an error status and body.
    pub fn failing(status: u16, message: impl Into<String>) -> Self {
        Self {
            reply: Reply::Error {
                status,
                message: message.into(),
            },
            delay: Duration::ZERO,
        }
    }

    /// Sleep before answering generate requests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn start(self) -> RunningOllama {
        let state = Arc::new(ServerState {
            reply: self.reply,
            delay: self.delay,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/api/generate", post(generate))
            .route("/api/tags", get(tags))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake ollama");
        let addr = listener.local_addr().expect("no local addr");
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .expect("fake ollama server failed");
        });

        RunningOllama {
            addr,
            state,
            _shutdown: tx,
        }
    }
}

impl RunningOllama {
    /// Base URL, e.g. `http://127.0.0.1:41234`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// JSON bodies of every generate request received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.state
            .requests
            .lock()
            .expect("request log poisoned")
            .clone()
    }
}

async fn generate(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let model = body["model"].as_str().unwrap_or_default().to_string();
    state
        .requests
        .lock()
        .expect("request log poisoned")
        .push(body);

    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }

    match &state.reply {
        Reply::Text(text) => (
            StatusCode::OK,
            Json(json!({ "model": model, "response": text, "done": true })),
        ),
        Reply::Error { status, message } => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(json!({ "error": message })),
        ),
    }
}

async fn tags() -> Json<Value> {
    Json(json!({ "models": [{ "name": "mistral:latest" }] }))
}

/// A URL on localhost that nothing is listening on.
pub async fn unused_local_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind probe listener");
    let addr = listener.local_addr().expect("no local addr");
    drop(listener);
    format!("http://{addr}")
}

// ===========================================================================
// Fake model clients
// ===========================================================================

/// Always returns the same completion. Counts calls.
#[derive(Debug)]
pub struct StaticModel {
    text: String,
    calls: AtomicUsize,
}

impl StaticModel {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for StaticModel {
    fn name(&self) -> &str {
        "static"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }

    async fn health_check(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Always fails with the given error.
#[derive(Debug)]
pub struct FailingModel {
    error: ModelError,
}

impl FailingModel {
    pub fn new(error: ModelError) -> Self {
        Self { error }
    }

    /// Simulates a model runtime that is not running.
    pub fn unavailable() -> Self {
        Self::new(ModelError::Unavailable("connection refused".into()))
    }
}

#[async_trait]
impl ModelClient for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        Err(self.error.clone())
    }

    async fn health_check(&self) -> Result<(), ModelError> {
        Err(self.error.clone())
    }
}

/// Decides each result from the prompt text.
pub struct FnModel<F> {
    f: F,
}

impl<F> FnModel<F>
where
    F: Fn(&str) -> Result<String, ModelError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> ModelClient for FnModel<F>
where
    F: Fn(&str) -> Result<String, ModelError> + Send + Sync,
{
    fn name(&self) -> &str {
        "fn"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        (self.f)(prompt)
    }

    async fn health_check(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Sleeps before answering and records how many calls overlap.
pub struct DelayedModel {
    delay_for: Box<dyn Fn(&str) -> Duration + Send + Sync>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl DelayedModel {
    /// Every call sleeps for `delay`.
    pub fn new(delay: Duration) -> Self {
        Self::with_delay_fn(move |_| delay)
    }

    /// The sleep is chosen per prompt.
    pub fn with_delay_fn(f: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            delay_for: Box::new(f),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Highest number of simultaneous `generate` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for DelayedModel {
    fn name(&self) -> &str {
        "delayed"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep((self.delay_for)(prompt)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("PLAN ({} chars of prompt)", prompt.len()))
    }

    async fn health_check(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

// ===========================================================================
// Fixtures
// ===========================================================================

pub const HEADER: &str = "name,problem,solution,landing_page";

/// `n` distinct, well-formed records named `Business 0` .. `Business n-1`.
pub fn sample_records(n: usize) -> Vec<BusinessRecord> {
    (0..n)
        .map(|i| {
            BusinessRecord::new(
                format!("Business {i}"),
                format!("Problem {i}"),
                format!("Solution {i}"),
                format!("business{i}.example.com"),
            )
        })
        .collect()
}

/// Write a CSV file with the standard header followed by `rows` verbatim.
pub fn write_csv(dir: &Path, rows: &[&str]) -> PathBuf {
    let path = dir.join("businesses.csv");
    let mut contents = String::from(HEADER);
    contents.push('\n');
    for row in rows {
        contents.push_str(row);
        contents.push('\n');
    }
    std::fs::write(&path, contents).expect("failed to write csv fixture");
    path
}

/// List the `.txt` plan files in `dir`, sorted.
pub fn plan_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.extension().is_some_and(|ext| ext == "txt")
                        && p.file_name().is_some_and(|n| n != "error_log.txt")
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}
