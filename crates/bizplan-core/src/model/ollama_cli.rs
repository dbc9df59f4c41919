//! Ollama CLI adapter.
//!
//! Runs `ollama run <model> <prompt>` as a subprocess and returns whatever
//! it prints on stdout.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ModelClient, ModelError};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Adapter for the `ollama` command-line runtime.
#[derive(Debug, Clone)]
pub struct OllamaCliClient {
    /// Path to the `ollama` binary. Defaults to `"ollama"` (found via `$PATH`).
    binary: String,
    model: String,
    timeout: Duration,
}

impl OllamaCliClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

    pub fn new(model: impl Into<String>) -> Self {
        Self {
            binary: "ollama".to_string(),
            model: model.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Use a binary outside `$PATH` (or a stand-in script in tests).
    pub fn with_binary(mut self, path: impl Into<String>) -> Self {
        self.binary = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the binary with `args`, returning trimmed stdout on success.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<String, ModelError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout kills the child.
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => ModelError::Unavailable(format!(
                "failed to run '{}' -- is ollama installed and on PATH? ({e})",
                self.binary
            )),
            _ => ModelError::Failed(format!("failed to spawn '{}': {e}", self.binary)),
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ModelError::Failed(format!(
                    "failed to wait on '{}': {e}",
                    self.binary
                )));
            }
            Err(_elapsed) => return Err(ModelError::Timeout(timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            if server_unreachable(detail) {
                return Err(ModelError::Unavailable(format!(
                    "ollama server is not running -- start it with `ollama serve` ({detail})"
                )));
            }
            return Err(ModelError::Failed(if detail.is_empty() {
                format!("ollama exited with {}", output.status)
            } else {
                format!("ollama exited with {}: {detail}", output.status)
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// The CLI prints these when it cannot reach the background server.
fn server_unreachable(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("could not connect") || stderr.contains("connection refused")
}

#[async_trait]
impl ModelClient for OllamaCliClient {
    fn name(&self) -> &str {
        "ollama-cli"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        debug!(model = %self.model, prompt_len = prompt.len(), "running ollama");
        let completion = self.run(&["run", self.model.as_str(), prompt], self.timeout).await?;
        if completion.is_empty() {
            return Err(ModelError::Failed("model returned an empty completion".into()));
        }
        Ok(completion)
    }

    async fn health_check(&self) -> Result<(), ModelError> {
        // `ollama list` fails when the server is down, unlike `--version`.
        self.run(&["list"], HEALTH_CHECK_TIMEOUT).await.map(|_| ())
    }
}
