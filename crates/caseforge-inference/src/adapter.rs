//! Retry- and timeout-aware wrappers around the raw model backends.
//!
//! Backends make exactly one HTTP call per method. The adapters add the
//! per-call timeout, the retry policy for transient failures, dimension
//! checks, and batch splitting with per-item fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use caseforge_core::defaults;
use caseforge_core::{EmbeddingBackend, Error, GenerationBackend, Result, Vector};

use crate::retry::{with_timeout, RetryPolicy, Sleeper, TokioSleeper};

/// Embedding calls with retry, timeout, batching and dimension checks.
#[derive(Clone)]
pub struct EmbeddingAdapter {
    backend: Arc<dyn EmbeddingBackend>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    timeout: Duration,
    batch_size: usize,
    dimension: usize,
}

impl EmbeddingAdapter {
    /// Wrap a backend using its advertised dimension and default settings.
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        let dimension = backend.dimension();
        Self {
            backend,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            timeout: Duration::from_secs(defaults::EMBED_TIMEOUT_SECS),
            batch_size: defaults::EMBED_BATCH_SIZE,
            dimension,
        }
    }

    /// Expected vector length. Vectors of any other length are rejected.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Timeout applied to each backend call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Maximum texts per backend call. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vector> {
        let texts = [text.to_string()];
        let mut vectors = self.call(&texts).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| Error::PermanentService("embedding backend returned no vector".into()))?;
        self.check_dimension(vector)
    }

    /// Embed many texts, one result per input in input order.
    ///
    /// Inputs are sent in batches of `batch_size`. When a batch call fails,
    /// each of its texts is retried on its own so one bad input only fails
    /// its own slot.
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "embedding_adapter", op = "embed_batch", input_count = texts.len()))]
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vector>> {
        let start = Instant::now();
        let mut results = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            match self.call(batch).await {
                Ok(vectors) => {
                    results.extend(vectors.into_iter().map(|v| self.check_dimension(v)));
                }
                Err(e) if batch.len() == 1 => results.push(Err(e)),
                Err(e) => {
                    warn!(
                        batch_len = batch.len(),
                        error = %e,
                        "Batch embedding failed, falling back to per-item calls"
                    );
                    for text in batch {
                        results.push(self.embed(text).await);
                    }
                }
            }
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        debug!(
            result_count = results.len() - failed,
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch embedding complete"
        );
        results
    }

    async fn call(&self, texts: &[String]) -> Result<Vec<Vector>> {
        let backend = &self.backend;
        let timeout = self.timeout;
        let vectors = self
            .policy
            .run(self.sleeper.as_ref(), "embed_texts", move || {
                with_timeout(timeout, "embed_texts", backend.embed_texts(texts))
            })
            .await?;

        if vectors.len() != texts.len() {
            return Err(Error::PermanentService(format!(
                "embedding backend returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    fn check_dimension(&self, vector: Vector) -> Result<Vector> {
        let len = vector.as_slice().len();
        if len != self.dimension {
            return Err(Error::PermanentService(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension, len
            )));
        }
        Ok(vector)
    }
}

/// Generation calls with retry and timeout.
#[derive(Clone)]
pub struct GenerationAdapter {
    backend: Arc<dyn GenerationBackend>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    timeout: Duration,
}

impl GenerationAdapter {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Free-form generation.
    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let backend = &self.backend;
        self.policy
            .run(self.sleeper.as_ref(), "generate", move || {
                with_timeout(
                    self.timeout,
                    "generate",
                    backend.generate_with_system(system, prompt),
                )
            })
            .await
    }

    /// Generation constrained to JSON output where the backend supports it.
    pub async fn generate_json(&self, system: &str, prompt: &str) -> Result<String> {
        let backend = &self.backend;
        self.policy
            .run(self.sleeper.as_ref(), "generate_json", move || {
                with_timeout(
                    self.timeout,
                    "generate_json",
                    backend.generate_json_with_system(system, prompt),
                )
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordingSleeper;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fails every call containing "poison" permanently, fails the first
    /// `transient` calls transiently, otherwise returns `[len; dim]`.
    struct FlakyEmbedder {
        dim: usize,
        transient: AtomicUsize,
        calls: Mutex<Vec<usize>>,
    }

    impl FlakyEmbedder {
        fn new(dim: usize, transient: usize) -> Self {
            Self {
                dim,
                transient: AtomicUsize::new(transient),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_sizes(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmbeddingBackend for FlakyEmbedder {
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
            self.calls.lock().unwrap().push(texts.len());
            if self
                .transient
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::TransientService("HTTP 503".into()));
            }
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(Error::PermanentService("HTTP 400".into()));
            }
            Ok(texts
                .iter()
                .map(|t| Vector::from(vec![t.len() as f32; self.dim]))
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dim
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl GenerationBackend for SlowGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.generate_with_system("", prompt).await
        }

        async fn generate_with_system(&self, _system: &str, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok("late".into())
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(
            3,
            Duration::from_millis(10),
            Duration::from_millis(100),
            2.0,
            0.0,
        )
    }

    fn adapter(backend: Arc<FlakyEmbedder>, sleeper: &RecordingSleeper) -> EmbeddingAdapter {
        EmbeddingAdapter::new(backend)
            .with_retry_policy(policy())
            .with_sleeper(Arc::new(sleeper.clone()))
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_embed_retries_transient_failures() {
        let backend = Arc::new(FlakyEmbedder::new(4, 2));
        let sleeper = RecordingSleeper::new();
        let vector = adapter(backend.clone(), &sleeper).embed("abc").await.unwrap();

        assert_eq!(vector.as_slice(), &[3.0, 3.0, 3.0, 3.0]);
        assert_eq!(backend.call_sizes(), vec![1, 1, 1]);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[tokio::test]
    async fn test_embed_exhausted_retries_is_transient() {
        let backend = Arc::new(FlakyEmbedder::new(4, 10));
        let sleeper = RecordingSleeper::new();
        let err = adapter(backend.clone(), &sleeper).embed("abc").await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(backend.call_sizes().len(), 3);
    }

    #[tokio::test]
    async fn test_embed_rejects_wrong_dimension() {
        let backend = Arc::new(FlakyEmbedder::new(4, 0));
        let sleeper = RecordingSleeper::new();
        let err = adapter(backend, &sleeper)
            .with_dimension(8)
            .embed("abc")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PermanentService(ref m) if m.contains("dimension mismatch")));
    }

    #[tokio::test]
    async fn test_embed_batch_splits_by_batch_size() {
        let backend = Arc::new(FlakyEmbedder::new(2, 0));
        let sleeper = RecordingSleeper::new();
        let results = adapter(backend.clone(), &sleeper)
            .with_batch_size(2)
            .embed_batch(&texts(&["a", "bb", "ccc", "dddd", "e"]))
            .await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(results[3].as_ref().unwrap().as_slice(), &[4.0, 4.0]);
        assert_eq!(backend.call_sizes(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_embed_batch_isolates_failing_item() {
        let backend = Arc::new(FlakyEmbedder::new(2, 0));
        let sleeper = RecordingSleeper::new();
        let results = adapter(backend.clone(), &sleeper)
            .with_batch_size(3)
            .embed_batch(&texts(&["one", "poison pill", "three"]))
            .await;

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::PermanentService(_))));
        assert!(results[2].is_ok());
        // one failed batch call, then one call per item
        assert_eq!(backend.call_sizes(), vec![3, 1, 1, 1]);
        // permanent errors are never retried
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_embed_batch_empty_input() {
        let backend = Arc::new(FlakyEmbedder::new(2, 0));
        let sleeper = RecordingSleeper::new();
        let results = adapter(backend.clone(), &sleeper).embed_batch(&[]).await;
        assert!(results.is_empty());
        assert!(backend.call_sizes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_timeout_is_transient_and_retried() {
        let sleeper = RecordingSleeper::new();
        let adapter = GenerationAdapter::new(Arc::new(SlowGenerator))
            .with_retry_policy(policy())
            .with_sleeper(Arc::new(sleeper.clone()))
            .with_timeout(Duration::from_millis(100));

        let err = adapter.generate("", "hello").await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("timed out"));
        assert_eq!(sleeper.delays().len(), 2);
    }
}
