use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{Device, OllamaConfig};

/// Why a generation call failed. Each category maps to the fixed reply the
/// user receives instead of model output.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The runtime answered but refused or failed the request.
    #[error("model backend returned {status}: {body}")]
    Backend {
        status: reqwest::StatusCode,
        body: String,
    },
    /// The runtime is unreachable or the model is not installed.
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected inference failure: {0}")]
    Unexpected(String),
}

impl InferenceError {
    pub fn fallback_reply(&self) -> &'static str {
        match self {
            InferenceError::Backend { .. } => "Erro ao gerar resposta com o modelo.",
            InferenceError::Unavailable(_) => "Modelo indisponível.",
            InferenceError::Unexpected(_) => "Erro inesperado na geração da resposta.",
        }
    }
}

/// A text-generation backend: prompt in, completion out.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_gpu: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for a local Ollama runtime's `/api/generate` endpoint.
pub struct OllamaClient {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn options(&self) -> Option<GenerateOptions> {
        match self.config.device {
            Device::Gpu => None,
            // Zero offloaded layers keeps the whole model on the CPU.
            Device::Cpu => Some(GenerateOptions { num_gpu: 0 }),
        }
    }
}

#[async_trait]
impl TextModel for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: self.options(),
        };

        let url = format!("{}/api/generate", self.config.base_url.trim_end_matches('/'));

        debug!(
            "Sending generate request to Ollama: {} (model={}, device={})",
            url, self.config.model, self.config.device
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    InferenceError::Unavailable(e.to_string())
                } else {
                    InferenceError::Unexpected(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Unavailable(format!(
                "model '{}' not found: {}",
                self.config.model, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Backend { status, body });
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Unexpected(format!("invalid Ollama response: {}", e)))?;

        Ok(generated.response)
    }
}
