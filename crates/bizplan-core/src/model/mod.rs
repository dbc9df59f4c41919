//! Model client interface for locally hosted text-generation models.
//!
//! This module defines the [`ModelClient`] trait that every backend
//! implements, the shared [`ModelError`] taxonomy, and [`ModelBackend`] for
//! picking an implementation from configuration.
//!
//! # Architecture
//!
//! ```text
//! run_batch
//!     |
//!     v
//! Arc<dyn ModelClient> --generate(prompt)--> completion text
//!     |
//!     +-- OllamaCliClient   `ollama run <model> <prompt>`
//!     +-- OllamaHttpClient  POST {host}/api/generate
//! ```

pub mod ollama_cli;
pub mod ollama_http;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use ollama_cli::OllamaCliClient;
pub use ollama_http::OllamaHttpClient;

/// Ways a generation request can fail. None of them abort a batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The model runtime is not installed, not running, or unreachable.
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("model timed out after {0:?}")]
    Timeout(Duration),

    /// The runtime answered but reported an error.
    #[error("model error: {0}")]
    Failed(String),
}

/// Adapter interface for a text-generation backend.
///
/// Object safe, so it can be shared as `Arc<dyn ModelClient>` across worker
/// tasks.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Short identifier for logs (e.g. "ollama-cli").
    fn name(&self) -> &str;

    /// Send a prompt and return the full completion.
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;

    /// Verify the backend is reachable without generating anything.
    async fn health_check(&self) -> Result<(), ModelError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn ModelClient) {}
};

/// Which transport to reach Ollama through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelBackend {
    /// Spawn the `ollama` binary once per prompt.
    #[default]
    OllamaCli,
    /// Talk to the Ollama HTTP API.
    OllamaHttp,
}

impl ModelBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OllamaCli => "ollama-cli",
            Self::OllamaHttp => "ollama-http",
        }
    }
}

impl fmt::Display for ModelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama-cli" | "cli" => Ok(Self::OllamaCli),
            "ollama-http" | "http" => Ok(Self::OllamaHttp),
            other => Err(format!(
                "unknown model backend {other:?} (expected ollama-cli or ollama-http)"
            )),
        }
    }
}

/// Everything needed to construct a client.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: ModelBackend,
    /// Model identifier passed to the runtime (e.g. "mistral").
    pub model: String,
    /// Path to the `ollama` binary for the CLI backend.
    pub ollama_bin: String,
    /// Base URL for the HTTP backend.
    pub host: String,
    /// Per-request bound enforced by the client itself.
    pub timeout: Duration,
}

/// Build the configured client.
pub fn build_client(settings: &ModelSettings) -> anyhow::Result<Arc<dyn ModelClient>> {
    let client: Arc<dyn ModelClient> = match settings.backend {
        ModelBackend::OllamaCli => Arc::new(
            OllamaCliClient::new(&settings.model)
                .with_binary(&settings.ollama_bin)
                .with_timeout(settings.timeout),
        ),
        ModelBackend::OllamaHttp => Arc::new(OllamaHttpClient::new(
            &settings.host,
            &settings.model,
            settings.timeout,
        )?),
    };
    tracing::debug!(backend = client.name(), model = %settings.model, "model client ready");
    Ok(client)
}
