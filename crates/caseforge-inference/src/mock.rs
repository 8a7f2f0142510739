//! Scripted inference backends for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use caseforge_inference::mock::{MockEmbeddingBackend, MockGenerationBackend};
//!
//! let embedder = MockEmbeddingBackend::new(64).with_permanent_failure("corrupt");
//! let generator = MockGenerationBackend::from_fn(|_system, prompt| {
//!     Ok(format!("echo: {}", prompt.len()))
//! });
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use caseforge_core::{
    EmbeddingBackend, Error, GenerationBackend, InferenceBackend, Result, Vector,
};

/// Which error a scripted failure produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Transient,
    Permanent,
}

impl MockFailure {
    fn to_error(self, detail: &str) -> Error {
        match self {
            Self::Transient => Error::TransientService(format!("mock transient: {}", detail)),
            Self::Permanent => Error::PermanentService(format!("mock permanent: {}", detail)),
        }
    }
}

/// Embedding backend producing bag-of-words vectors.
///
/// Texts sharing words get similar vectors, so nearest-neighbour retrieval
/// over mock embeddings behaves sensibly.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    failures: Arc<Vec<(String, MockFailure)>>,
    transient_budget: Arc<AtomicUsize>,
    returned_dimension: Option<usize>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            failures: Arc::new(Vec::new()),
            transient_budget: Arc::new(AtomicUsize::new(0)),
            returned_dimension: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Any call containing a text with `needle` fails permanently.
    pub fn with_permanent_failure(self, needle: impl Into<String>) -> Self {
        self.with_failure(needle, MockFailure::Permanent)
    }

    /// Any call containing a text with `needle` fails transiently, forever.
    pub fn with_transient_failure(self, needle: impl Into<String>) -> Self {
        self.with_failure(needle, MockFailure::Transient)
    }

    fn with_failure(mut self, needle: impl Into<String>, failure: MockFailure) -> Self {
        Arc::make_mut(&mut self.failures).push((needle.into(), failure));
        self
    }

    /// The first `count` calls fail transiently.
    pub fn with_transient_calls(self, count: usize) -> Self {
        self.transient_budget.store(count, Ordering::SeqCst);
        self
    }

    /// Return vectors of `dimension` while still advertising the configured one.
    pub fn with_returned_dimension(mut self, dimension: usize) -> Self {
        self.returned_dimension = Some(dimension);
        self
    }

    /// Number of backend calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Total texts across all calls.
    pub fn embedded_text_count(&self) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Deterministic embedding of `text` at the configured dimension.
    pub fn vector_for(&self, text: &str) -> Vector {
        Vector::from(bag_of_words(text, self.dimension))
    }
}

fn bag_of_words(text: &str, dimension: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dimension.max(1)];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let slot = (fnv1a(&word.to_lowercase()) % v.len() as u64) as usize;
        v[slot] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v[0] = 1.0;
    } else {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v.truncate(dimension);
    v
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf29ce484222325u64, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(texts.to_vec());
        }

        if self
            .transient_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MockFailure::Transient.to_error("scheduled"));
        }

        for (needle, failure) in self.failures.iter() {
            if texts.iter().any(|t| t.contains(needle.as_str())) {
                return Err(failure.to_error(needle));
            }
        }

        let dimension = self.returned_dimension.unwrap_or(self.dimension);
        Ok(texts
            .iter()
            .map(|t| Vector::from(bag_of_words(t, dimension)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

type Responder = dyn Fn(&str, &str) -> Result<String> + Send + Sync;

/// Generation backend driven by a closure or a fixed response queue.
#[derive(Clone)]
pub struct MockGenerationBackend {
    responder: Arc<Responder>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockGenerationBackend {
    /// Answer every call with `responder(system, prompt)`.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer calls with `responses` in order, repeating the last one.
    pub fn with_responses(responses: Vec<String>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::from_fn(move |_, _| {
            let mut queue = queue
                .lock()
                .map_err(|_| Error::Internal("mock response queue poisoned".into()))?;
            match queue.len() {
                0 => Err(Error::PermanentService("mock has no responses".into())),
                1 => Ok(queue[0].clone()),
                _ => Ok(queue.pop_front().unwrap_or_default()),
            }
        })
    }

    /// Always answer with `response`.
    pub fn fixed(response: impl Into<String>) -> Self {
        let response = response.into();
        Self::from_fn(move |_, _| Ok(response.clone()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// `(system, prompt)` pairs received so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((system.to_string(), prompt.to_string()));
        }
        (self.responder)(system, prompt)
    }

    fn model_name(&self) -> &str {
        "mock-gen"
    }
}

/// Embedding and generation mocks bundled as one backend.
#[derive(Clone)]
pub struct MockInferenceBackend {
    pub embedding: MockEmbeddingBackend,
    pub generation: MockGenerationBackend,
    /// Answer of `health_check`.
    pub healthy: bool,
}

#[async_trait]
impl EmbeddingBackend for MockInferenceBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.embedding.embed_texts(texts).await
    }

    fn dimension(&self) -> usize {
        self.embedding.dimension()
    }

    fn model_name(&self) -> &str {
        self.embedding.model_name()
    }
}

#[async_trait]
impl GenerationBackend for MockInferenceBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generation.generate(prompt).await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.generation.generate_with_system(system, prompt).await
    }

    fn model_name(&self) -> &str {
        self.generation.model_name()
    }
}

#[async_trait]
impl InferenceBackend for MockInferenceBackend {
    async fn health_check(&self) -> Result<bool> {
        Ok(self.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embeddings_are_deterministic_and_normalized() {
        let backend = MockEmbeddingBackend::new(32);
        let texts = vec!["Refunds within 30 days".to_string()];
        let a = backend.embed_texts(&texts).await.unwrap();
        let b = backend.embed_texts(&texts).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].as_slice().iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_embedding_failures() {
        let backend = MockEmbeddingBackend::new(8)
            .with_permanent_failure("corrupt")
            .with_transient_calls(1);
        let ok = vec!["fine".to_string()];
        let bad = vec!["corrupt bytes".to_string()];

        assert!(backend.embed_texts(&ok).await.unwrap_err().is_transient());
        assert!(backend.embed_texts(&ok).await.is_ok());
        assert!(matches!(
            backend.embed_texts(&bad).await,
            Err(Error::PermanentService(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_wrong_dimension() {
        let backend = MockEmbeddingBackend::new(8).with_returned_dimension(4);
        let vectors = backend.embed_texts(&["x".to_string()]).await.unwrap();
        assert_eq!(vectors[0].as_slice().len(), 4);
        assert_eq!(backend.dimension(), 8);
    }

    #[tokio::test]
    async fn test_mock_generation_response_queue() {
        let backend =
            MockGenerationBackend::with_responses(vec!["first".into(), "second".into()]);
        assert_eq!(backend.generate("a").await.unwrap(), "first");
        assert_eq!(backend.generate("b").await.unwrap(), "second");
        assert_eq!(backend.generate("c").await.unwrap(), "second");
        assert_eq!(backend.call_count(), 3);
        assert_eq!(backend.calls()[1].1, "b");
    }

    #[tokio::test]
    async fn test_mock_json_generation_falls_back_to_plain() {
        let backend = MockGenerationBackend::fixed("[]");
        assert_eq!(
            backend.generate_json_with_system("sys", "p").await.unwrap(),
            "[]"
        );
        assert_eq!(backend.calls()[0].0, "sys");
    }
}
