//! OpenAI-compatible inference backend implementation.
//!
//! Works against any endpoint exposing `/embeddings` and
//! `/chat/completions` (OpenAI, vLLM, LocalAI, OpenRouter).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use caseforge_core::defaults;
use caseforge_core::{
    EmbeddingBackend, Error, GenerationBackend, InferenceBackend, Result, Vector,
};

use crate::http::{build_client, parse_json};

/// Default OpenAI API endpoint.
pub const DEFAULT_OPENAI_URL: &str = defaults::OPENAI_URL;

const SERVICE: &str = "OpenAI";

/// Configuration for OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model to use for embeddings.
    pub embed_model: String,
    /// Model to use for generation.
    pub gen_model: String,
    /// Expected embedding dimension.
    pub embed_dimension: usize,
    /// Sampling temperature for chat completions.
    pub temperature: f32,
    /// Embedding request timeout in seconds.
    pub embed_timeout_secs: u64,
    /// Generation request timeout in seconds.
    pub gen_timeout_secs: u64,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: None,
            embed_model: defaults::OPENAI_EMBED_MODEL.to_string(),
            gen_model: defaults::OPENAI_GEN_MODEL.to_string(),
            embed_dimension: defaults::EMBED_DIMENSION,
            temperature: defaults::GEN_TEMPERATURE,
            embed_timeout_secs: defaults::EMBED_TIMEOUT_SECS,
            gen_timeout_secs: defaults::GEN_TIMEOUT_SECS,
        }
    }
}

impl OpenAIConfig {
    /// Create from environment variables.
    ///
    /// - `OPENAI_BASE_URL`, `OPENAI_API_KEY`
    /// - `OPENAI_EMBED_MODEL`, `OPENAI_GEN_MODEL`
    /// - `EMBED_DIMENSION`, `EMBED_TIMEOUT_SECS`, `GEN_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let base = Self::default();
        let parse = |key: &str| std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok());
        Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(base.base_url),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            embed_model: std::env::var("OPENAI_EMBED_MODEL").unwrap_or(base.embed_model),
            gen_model: std::env::var("OPENAI_GEN_MODEL").unwrap_or(base.gen_model),
            embed_dimension: parse("EMBED_DIMENSION")
                .map(|v| v as usize)
                .unwrap_or(base.embed_dimension),
            temperature: base.temperature,
            embed_timeout_secs: parse("EMBED_TIMEOUT_SECS").unwrap_or(base.embed_timeout_secs),
            gen_timeout_secs: parse("GEN_TIMEOUT_SECS").unwrap_or(base.gen_timeout_secs),
        }
    }
}

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    /// Invalid authentication credentials.
    AuthenticationError,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// Model not found or not available.
    ModelNotFound,
    /// Request too large.
    ContextLengthExceeded,
    /// Request timed out upstream.
    Timeout,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) | (403, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (408, _) => Self::Timeout,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::Timeout | Self::ServerError)
    }

    /// Convert into a caseforge error carrying `message`.
    pub fn into_error(self, status: u16, message: &str) -> Error {
        let msg = format!("OpenAI returned {} ({:?}): {}", status, self, message);
        if self.is_retryable() {
            Error::TransientService(msg)
        } else {
            Error::PermanentService(msg)
        }
    }
}

/// OpenAI-compatible inference backend.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    /// Create a new OpenAI backend with the given configuration.
    pub fn new(config: OpenAIConfig) -> Self {
        let timeout = Duration::from_secs(config.gen_timeout_secs.max(config.embed_timeout_secs));
        info!(
            subsystem = "inference",
            component = "openai",
            base_url = %config.base_url,
            embed_model = %config.embed_model,
            gen_model = %config.gen_model,
            dimension = config.embed_dimension,
            "OpenAI backend configured"
        );
        Self {
            client: build_client(timeout),
            config,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(OpenAIConfig::from_env())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn build_request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut request = self.client.request(method, &url);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }
        request
    }

    async fn error_from_response(response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<OpenAIErrorResponse>(&body) {
            Ok(parsed) => {
                let error_type = parsed.error.error_type.unwrap_or_default();
                OpenAIErrorCode::from_response(status, &error_type)
                    .into_error(status, &parsed.error.message)
            }
            Err(_) => Error::from_status(status, &body),
        }
    }

    async fn chat(&self, system: &str, prompt: &str, json: bool) -> Result<String> {
        let start = Instant::now();

        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request = ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages,
            temperature: Some(self.config.temperature),
            response_format: json.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
            stream: false,
        };

        let response = self
            .build_request(reqwest::Method::POST, "/chat/completions")
            .timeout(Duration::from_secs(self.config.gen_timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(Error::from)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let result: ChatCompletionResponse = parse_json(response, SERVICE).await?;
        let content = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::PermanentService("OpenAI returned no choices".to_string()))?;

        let elapsed = start.elapsed().as_millis();
        debug!(
            response_len = content.len(),
            duration_ms = elapsed as u64,
            "Generation complete"
        );
        if elapsed > defaults::SLOW_OPERATION_MS {
            warn!(
                duration_ms = elapsed as u64,
                prompt_len = prompt.len(),
                slow = true,
                "Slow generation operation"
            );
        }
        Ok(content)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorBody,
}

#[derive(Deserialize)]
struct OpenAIErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "openai", op = "embed_texts", model = %self.config.embed_model, input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let request = EmbeddingRequest {
            model: self.config.embed_model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .build_request(reqwest::Method::POST, "/embeddings")
            .timeout(Duration::from_secs(self.config.embed_timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(Error::from)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let result: EmbeddingResponse = parse_json(response, SERVICE).await?;
        if result.data.len() != texts.len() {
            return Err(Error::PermanentService(format!(
                "OpenAI returned {} embeddings for {} inputs",
                result.data.len(),
                texts.len()
            )));
        }

        let mut data = result.data;
        data.sort_by_key(|d| d.index);
        let vectors: Vec<Vector> = data.into_iter().map(|d| Vector::from(d.embedding)).collect();

        let elapsed = start.elapsed().as_millis();
        debug!(
            result_count = vectors.len(),
            duration_ms = elapsed as u64,
            "Embedding complete"
        );
        if elapsed > defaults::SLOW_OPERATION_MS {
            warn!(
                duration_ms = elapsed as u64,
                input_count = texts.len(),
                slow = true,
                "Slow embedding operation"
            );
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.embed_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embed_model
    }
}

#[async_trait]
impl GenerationBackend for OpenAIBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    #[instrument(skip(self, system, prompt), fields(subsystem = "inference", component = "openai", op = "generate", model = %self.config.gen_model, prompt_len = prompt.len()))]
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(system, prompt, false).await
    }

    #[instrument(skip(self, system, prompt), fields(subsystem = "inference", component = "openai", op = "generate_json", model = %self.config.gen_model, prompt_len = prompt.len()))]
    async fn generate_json_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(system, prompt, true).await
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }
}

#[async_trait]
impl InferenceBackend for OpenAIBackend {
    async fn health_check(&self) -> Result<bool> {
        let response = self
            .build_request(reqwest::Method::GET, "/models")
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("OpenAI health check passed");
                Ok(true)
            }
            Ok(resp) => {
                warn!("OpenAI health check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("OpenAI health check error: {}", e);
                Ok(false)
            }
        }
    }
}
