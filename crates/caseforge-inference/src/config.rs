//! Backend selection and adapter construction from the environment.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use caseforge_core::defaults;
use caseforge_core::{EmbeddingBackend, Error, GenerationBackend, InferenceBackend, Result};

use crate::adapter::{EmbeddingAdapter, GenerationAdapter};
use crate::retry::RetryPolicy;

/// Which model service to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Ollama,
    OpenAI,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(Error::Config(format!("unknown inference backend: {}", s))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAI => write!(f, "openai"),
        }
    }
}

/// Adapter-level settings shared by both backends.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub backend: BackendKind,
    pub embed_dimension: usize,
    pub embed_batch_size: usize,
    pub embed_timeout: Duration,
    pub gen_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            embed_dimension: defaults::EMBED_DIMENSION,
            embed_batch_size: defaults::EMBED_BATCH_SIZE,
            embed_timeout: Duration::from_secs(defaults::EMBED_TIMEOUT_SECS),
            gen_timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl InferenceConfig {
    /// Load from environment variables.
    ///
    /// - `INFERENCE_BACKEND` (`ollama` | `openai`)
    /// - `EMBED_DIMENSION`, `EMBED_BATCH_SIZE`
    /// - `EMBED_TIMEOUT_SECS`, `GEN_TIMEOUT_SECS`
    /// - `RETRY_*` (see [`RetryPolicy::from_env`])
    pub fn from_env() -> Result<Self> {
        let base = Self::default();
        let parse = |key: &str| std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok());

        let backend = match std::env::var("INFERENCE_BACKEND") {
            Ok(v) if !v.trim().is_empty() => v.parse()?,
            _ => base.backend,
        };

        Ok(Self {
            backend,
            embed_dimension: parse("EMBED_DIMENSION")
                .map(|v| v as usize)
                .unwrap_or(base.embed_dimension),
            embed_batch_size: parse("EMBED_BATCH_SIZE")
                .map(|v| (v as usize).max(1))
                .unwrap_or(base.embed_batch_size),
            embed_timeout: parse("EMBED_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.embed_timeout),
            gen_timeout: parse("GEN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.gen_timeout),
            retry: RetryPolicy::from_env(),
        })
    }
}

/// A configured backend pair plus the adapters wrapping it.
#[derive(Clone)]
pub struct InferenceStack {
    pub backend: Arc<dyn InferenceBackend>,
    pub embedder: EmbeddingAdapter,
    pub generator: GenerationAdapter,
}

impl InferenceStack {
    /// Wrap one backend serving both embedding and generation.
    pub fn new<B>(backend: Arc<B>, config: &InferenceConfig) -> Self
    where
        B: InferenceBackend + 'static,
    {
        let embedding: Arc<dyn EmbeddingBackend> = backend.clone();
        let generation: Arc<dyn GenerationBackend> = backend.clone();

        let embedder = EmbeddingAdapter::new(embedding)
            .with_dimension(config.embed_dimension)
            .with_batch_size(config.embed_batch_size)
            .with_timeout(config.embed_timeout)
            .with_retry_policy(config.retry.clone());
        let generator = GenerationAdapter::new(generation)
            .with_timeout(config.gen_timeout)
            .with_retry_policy(config.retry.clone());

        Self {
            backend,
            embedder,
            generator,
        }
    }

    /// Build the backend selected by `INFERENCE_BACKEND`.
    pub fn from_env() -> Result<Self> {
        let config = InferenceConfig::from_env()?;
        info!(
            subsystem = "inference",
            backend = %config.backend,
            dimension = config.embed_dimension,
            max_attempts = config.retry.max_attempts,
            "Inference backend selected"
        );
        match config.backend {
            #[cfg(feature = "ollama")]
            BackendKind::Ollama => {
                let backend = crate::ollama::OllamaBackend::from_env()
                    .with_timeouts(config.embed_timeout, config.gen_timeout);
                Ok(Self::new(Arc::new(backend), &config))
            }
            #[cfg(feature = "openai")]
            BackendKind::OpenAI => {
                let backend = crate::openai::OpenAIBackend::from_env();
                Ok(Self::new(Arc::new(backend), &config))
            }
            #[allow(unreachable_patterns)]
            other => Err(Error::Config(format!(
                "inference backend '{}' is not compiled in",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("ollama".parse::<BackendKind>().unwrap(), BackendKind::Ollama);
        assert_eq!(" OpenAI ".parse::<BackendKind>().unwrap(), BackendKind::OpenAI);
        assert!(matches!(
            "bedrock".parse::<BackendKind>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_backend_kind_display_roundtrip() {
        for kind in [BackendKind::Ollama, BackendKind::OpenAI] {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_default_config() {
        let config = InferenceConfig::default();
        assert_eq!(config.backend, BackendKind::Ollama);
        assert_eq!(config.embed_batch_size, 16);
        assert_eq!(config.embed_timeout, Duration::from_secs(30));
        assert_eq!(config.gen_timeout, Duration::from_secs(120));
    }
}
