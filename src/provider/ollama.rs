//! Ollama-backed [`Generator`] over the `/api/generate` endpoint.
//!
//! ureq is blocking, so each call runs on tokio's blocking pool.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, Generator, ProviderError, ProviderResult};

/// Configuration for the Ollama client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    pub base_url: String,
    /// Model name to use.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            timeout_secs: 120,
        }
    }
}

/// Generator backed by a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    config: OllamaConfig,
}

impl OllamaGenerator {
    pub fn new(config: OllamaConfig) -> Self {
        Self { config }
    }

    /// Check that the server answers on `/api/tags`.
    pub fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        matches!(agent.get(&url).call(), Ok(resp) if resp.status() == 200)
    }

    fn generate_blocking(config: &OllamaConfig, prompt: &str) -> ProviderResult<String> {
        let url = format!("{}/api/generate", config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();

        let body = serde_json::json!({
            "model": config.model,
            "prompt": prompt,
            "stream": false,
        });

        let resp = agent
            .post(&url)
            .send_json(body)
            .map_err(|e| match e {
                ureq::Error::Transport(t) => {
                    tracing::debug!(error = %t, "ollama transport failure");
                    ProviderError::Unavailable {
                        url: config.base_url.clone(),
                    }
                }
                other => ProviderError::Request {
                    message: other.to_string(),
                },
            })?;

        let json: serde_json::Value = resp.into_json().map_err(|e| ProviderError::Parse {
            message: e.to_string(),
        })?;

        json["response"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::Parse {
                message: "missing 'response' field".into(),
            })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn complete(&self, request: GenerationRequest) -> ProviderResult<String> {
        let config = self.config.clone();
        let prompt = request.prompt;
        tokio::task::spawn_blocking(move || Self::generate_blocking(&config, &prompt))
            .await
            .map_err(|e| ProviderError::Request {
                message: format!("generation task failed: {e}"),
            })?
    }
}
