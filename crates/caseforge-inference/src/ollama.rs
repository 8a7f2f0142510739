//! Ollama inference backend implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use caseforge_core::defaults;
use caseforge_core::{
    EmbeddingBackend, Error, GenerationBackend, InferenceBackend, Result, Vector,
};

use crate::http::{build_client, check_status, parse_json};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = defaults::OLLAMA_URL;

/// Default embedding model.
pub const DEFAULT_EMBED_MODEL: &str = defaults::EMBED_MODEL;

/// Default generation model.
pub const DEFAULT_GEN_MODEL: &str = defaults::GEN_MODEL;

const SERVICE: &str = "Ollama";

/// Ollama inference backend.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    embed_model: String,
    gen_model: String,
    dimension: usize,
    temperature: f32,
    embed_timeout: Duration,
    gen_timeout: Duration,
}

impl OllamaBackend {
    /// Create a new Ollama backend with default settings.
    pub fn new() -> Self {
        Self::with_config(
            DEFAULT_OLLAMA_URL.to_string(),
            DEFAULT_EMBED_MODEL.to_string(),
            DEFAULT_GEN_MODEL.to_string(),
            defaults::EMBED_DIMENSION,
        )
    }

    /// Create a new Ollama backend with custom configuration.
    ///
    /// Timeouts come from `EMBED_TIMEOUT_SECS` and `GEN_TIMEOUT_SECS`.
    pub fn with_config(
        base_url: String,
        embed_model: String,
        gen_model: String,
        dimension: usize,
    ) -> Self {
        let gen_timeout = env_secs("GEN_TIMEOUT_SECS", defaults::GEN_TIMEOUT_SECS);
        let embed_timeout = env_secs("EMBED_TIMEOUT_SECS", defaults::EMBED_TIMEOUT_SECS);

        info!(
            subsystem = "inference",
            component = "ollama",
            base_url = %base_url,
            embed_model = %embed_model,
            gen_model = %gen_model,
            dimension,
            "Ollama backend configured"
        );

        Self {
            client: build_client(gen_timeout.max(embed_timeout)),
            base_url: base_url.trim_end_matches('/').to_string(),
            embed_model,
            gen_model,
            dimension,
            temperature: defaults::GEN_TEMPERATURE,
            embed_timeout,
            gen_timeout,
        }
    }

    /// Create from environment variables.
    ///
    /// - `OLLAMA_BASE`
    /// - `OLLAMA_EMBED_MODEL`
    /// - `OLLAMA_GEN_MODEL`
    /// - `OLLAMA_EMBED_DIM` (falls back to `EMBED_DIMENSION`)
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OLLAMA_BASE").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let embed_model =
            std::env::var("OLLAMA_EMBED_MODEL").unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string());
        let gen_model =
            std::env::var("OLLAMA_GEN_MODEL").unwrap_or_else(|_| DEFAULT_GEN_MODEL.to_string());
        let dimension = std::env::var("OLLAMA_EMBED_DIM")
            .or_else(|_| std::env::var("EMBED_DIMENSION"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::EMBED_DIMENSION);

        Self::with_config(base_url, embed_model, gen_model, dimension)
    }

    /// Override the sampling temperature sent with chat requests.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override both request timeouts.
    pub fn with_timeouts(mut self, embed: Duration, gen: Duration) -> Self {
        self.embed_timeout = embed;
        self.gen_timeout = gen;
        self
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
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

        let request = ChatRequest {
            model: self.gen_model.clone(),
            messages,
            stream: false,
            format: json.then(|| serde_json::json!("json")),
            think: json.then_some(false),
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.gen_timeout)
            .json(&request)
            .send()
            .await
            .map_err(Error::from)?;

        let response = check_status(response, SERVICE).await?;
        let result: ChatResponse = parse_json(response, SERVICE).await?;

        let content = result.message.content;
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

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default),
    )
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Chat API message for `/api/chat`.
#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    /// Set to `"json"` to constrain output to valid JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
    /// Suppresses chain-of-thought for reasoning models in JSON mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "ollama", op = "embed_texts", model = %self.embed_model, input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();

        let request = EmbeddingRequest {
            model: self.embed_model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .timeout(self.embed_timeout)
            .json(&request)
            .send()
            .await
            .map_err(Error::from)?;

        let response = check_status(response, SERVICE).await?;
        let result: EmbeddingResponse = parse_json(response, SERVICE).await?;

        if result.embeddings.len() != texts.len() {
            return Err(Error::PermanentService(format!(
                "Ollama returned {} embeddings for {} inputs",
                result.embeddings.len(),
                texts.len()
            )));
        }

        let vectors: Vec<Vector> = result.embeddings.into_iter().map(Vector::from).collect();
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
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.embed_model
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    #[instrument(skip(self, system, prompt), fields(subsystem = "inference", component = "ollama", op = "generate", model = %self.gen_model, prompt_len = prompt.len()))]
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(system, prompt, false).await
    }

    #[instrument(skip(self, system, prompt), fields(subsystem = "inference", component = "ollama", op = "generate_json", model = %self.gen_model, prompt_len = prompt.len()))]
    async fn generate_json_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.chat(system, prompt, true).await
    }

    fn model_name(&self) -> &str {
        &self.gen_model
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("Ollama health check passed");
                Ok(true)
            }
            Ok(resp) => {
                warn!("Ollama health check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Ollama health check error: {}", e);
                Ok(false)
            }
        }
    }
}
