//! # caseforge-inference
//!
//! Embedding and generation backends for caseforge.
//!
//! This crate provides:
//! - Ollama implementation (default)
//! - OpenAI-compatible implementation (optional, feature `openai`)
//! - Retry policy with exponential backoff and an injectable sleeper
//! - Adapters adding timeouts, retries, batching and dimension checks
//! - Scripted backends for tests (feature `mock`)
//!
//! # Feature Flags
//!
//! - `ollama` (default): Enable Ollama backend
//! - `openai`: Enable OpenAI-compatible backend
//! - `mock`: Enable scripted backends
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use caseforge_inference::{EmbeddingAdapter, OllamaBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let adapter = EmbeddingAdapter::new(Arc::new(OllamaBackend::from_env()));
//!     let vector = adapter.embed("Employees must complete onboarding").await;
//! }
//! ```

pub mod adapter;
pub mod config;
mod http;
pub mod retry;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use adapter::{EmbeddingAdapter, GenerationAdapter};
pub use config::{BackendKind, InferenceConfig, InferenceStack};
pub use retry::{with_timeout, RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig, OpenAIErrorCode};
