//! Ollama HTTP adapter.
//!
//! Calls `POST {host}/api/generate` with streaming disabled and returns the
//! `response` field of the reply.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ModelClient, ModelError};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Adapter for a running Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaHttpClient {
    http: HttpClient,
    host: String,
    model: String,
    timeout: Duration,
}

impl OllamaHttpClient {
    pub const DEFAULT_HOST: &str = "http://localhost:11434";

    /// Build a client for `host`. `timeout` bounds each whole request.
    pub fn new(host: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> ModelError {
        if err.is_timeout() {
            ModelError::Timeout(self.timeout)
        } else if err.is_connect() {
            ModelError::Unavailable(format!(
                "cannot reach ollama at {} -- is `ollama serve` running? ({err})",
                self.host
            ))
        } else {
            ModelError::Failed(err.to_string())
        }
    }
}

/// Pull a readable message out of an error response body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[async_trait]
impl ModelClient for OllamaHttpClient {
    fn name(&self) -> &str {
        "ollama-http"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!("{}/api/generate", self.host);
        debug!(url = %url, model = %self.model, prompt_len = prompt.len(), "posting to ollama");

        let response = self
            .http
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            return Err(ModelError::Failed(format!(
                "ollama returned {status}: {}",
                error_message(&body)
            )));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| ModelError::Failed(format!("malformed response from ollama: {e}")))?;
        if let Some(error) = parsed.error {
            return Err(ModelError::Failed(error));
        }

        let completion = parsed.response.unwrap_or_default().trim().to_string();
        if completion.is_empty() {
            return Err(ModelError::Failed("model returned an empty completion".into()));
        }
        Ok(completion)
    }

    async fn health_check(&self) -> Result<(), ModelError> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ModelError::Failed(format!(
                "ollama health check returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizplan_test_utils::FakeOllama;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn returns_response_field() {
        let server = FakeOllama::replying("  PLAN_TEXT \n").start().await;
        let client = OllamaHttpClient::new(&server.url(), "mistral", TIMEOUT).unwrap();

        assert_eq!(client.generate("prompt").await.unwrap(), "PLAN_TEXT");
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["model"], "mistral");
        assert_eq!(requests[0]["prompt"], "prompt");
        assert_eq!(requests[0]["stream"], false);
    }

    #[tokio::test]
    async fn error_status_is_model_error() {
        let server = FakeOllama::failing(404, "model 'nope' not found").start().await;
        let client = OllamaHttpClient::new(&server.url(), "nope", TIMEOUT).unwrap();

        match client.generate("prompt").await {
            Err(ModelError::Failed(msg)) => {
                assert!(msg.contains("404"), "{msg}");
                assert!(msg.contains("model 'nope' not found"), "{msg}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_unavailable() {
        let url = bizplan_test_utils::unused_local_url().await;
        let client = OllamaHttpClient::new(&url, "mistral", TIMEOUT).unwrap();

        assert!(matches!(
            client.generate("prompt").await,
            Err(ModelError::Unavailable(_))
        ));
        assert!(matches!(
            client.health_check().await,
            Err(ModelError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = FakeOllama::replying("late")
            .with_delay(Duration::from_secs(3))
            .start()
            .await;
        let client =
            OllamaHttpClient::new(&server.url(), "mistral", Duration::from_millis(200)).unwrap();

        assert_eq!(
            client.generate("prompt").await,
            Err(ModelError::Timeout(Duration::from_millis(200)))
        );
    }

    #[tokio::test]
    async fn health_check_hits_tags() {
        let server = FakeOllama::replying("x").start().await;
        let client = OllamaHttpClient::new(&format!("{}/", server.url()), "m", TIMEOUT).unwrap();
        client.health_check().await.unwrap();
    }

    #[test]
    fn error_message_prefers_json_error_field() {
        assert_eq!(error_message(r#"{"error":"boom"}"#), "boom");
        assert_eq!(error_message(" plain text \n"), "plain text");
    }
}
