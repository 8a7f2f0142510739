//! Core traits for caseforge abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// DOCUMENT REPOSITORY
// =============================================================================

/// Storage for extracted documents.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Insert a document, replacing any stored document with the same id.
    async fn insert(&self, document: &Document) -> Result<()>;

    /// Fetch a document by id.
    async fn get(&self, id: Uuid) -> Result<Option<Document>>;

    /// Update the document's lifecycle status.
    async fn update_status(&self, id: Uuid, status: DocumentStatus) -> Result<()>;
}

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Persistence for processing jobs.
///
/// Implementations guarantee at most one non-terminal job per
/// `(document_id, job_type)`, monotonic progress, first-error-wins and
/// terminal-state finality.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a pending job, failing with `ConcurrencyViolation` when a
    /// non-terminal job of the same type exists for the document.
    async fn create_exclusive(&self, document_id: Uuid, job_type: JobType)
        -> Result<ProcessingJob>;

    /// Move a pending job to processing. Returns false if the job is not pending.
    async fn mark_processing(&self, job_id: Uuid) -> Result<bool>;

    /// Raise progress. Values lower than the stored progress are ignored.
    async fn update_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()>;

    /// Record the number of work items (chunks) the job covers.
    async fn set_total_items(&self, job_id: Uuid, total: i32) -> Result<()>;

    /// Mark a non-terminal job completed. Returns false if already terminal.
    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<bool>;

    /// Mark a non-terminal job failed, keeping the first recorded error.
    /// Returns false if already terminal.
    async fn fail(&self, job_id: Uuid, error: &str, result: Option<JsonValue>) -> Result<bool>;

    /// Mark a non-terminal job cancelled. Returns false if already terminal.
    async fn cancel(&self, job_id: Uuid) -> Result<bool>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<ProcessingJob>>;

    /// Non-terminal job of the given type for a document, if any.
    async fn active_for_document(
        &self,
        document_id: Uuid,
        job_type: JobType,
    ) -> Result<Option<ProcessingJob>>;

    /// All jobs for a document, newest first.
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingJob>>;
}

// =============================================================================
// TEST CASE REPOSITORY
// =============================================================================

/// Storage for generated test cases.
#[async_trait]
pub trait TestCaseRepository: Send + Sync {
    /// Atomically replace every test case of a document with `cases`.
    async fn replace_for_document(&self, document_id: Uuid, cases: &[TestCase]) -> Result<()>;

    /// Test cases of a document ordered by category, then creation order.
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<TestCase>>;
}

// =============================================================================
// VECTOR STORE
// =============================================================================

/// Which chunks a nearest-neighbour query may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetrievalScope {
    /// Any stored chunk.
    #[default]
    All,
    /// Only chunks of one document.
    Document(Uuid),
}

impl RetrievalScope {
    /// Whether a chunk of `document_id` falls inside this scope.
    pub fn contains(&self, document_id: Uuid) -> bool {
        match self {
            Self::All => true,
            Self::Document(id) => *id == document_id,
        }
    }

    /// Document filter, if scoped.
    pub fn document_id(&self) -> Option<Uuid> {
        match self {
            Self::All => None,
            Self::Document(id) => Some(*id),
        }
    }
}

/// Store of embedded chunks.
///
/// Many readers may query concurrently; inserts never mutate an existing
/// chunk. A document's chunks are only removed when its content changes.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store embedded chunks. Chunks whose id is already stored are skipped.
    /// Returns the number of newly stored chunks.
    async fn insert(&self, chunks: &[Chunk]) -> Result<usize>;

    /// Up to `k` chunks in `scope` by ascending cosine distance to `query`.
    async fn nearest(
        &self,
        query: &Vector,
        k: usize,
        scope: RetrievalScope,
    ) -> Result<Vec<ScoredChunk>>;

    /// Stored chunks of a document, by ordinal.
    async fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>>;

    /// Delete the document's chunks whose id is not in `keep`.
    /// Returns the number of deleted chunks.
    async fn retain_for_document(&self, document_id: Uuid, keep: &[Uuid]) -> Result<usize>;

    /// Embedding dimension accepted by the store.
    fn dimension(&self) -> usize;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns a vector of embedding vectors, one per input text.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Generate with system context, asking the backend to emit JSON only.
    ///
    /// Backends without a JSON mode fall back to plain generation.
    async fn generate_json_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.generate_with_system(system, prompt).await
    }

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Combined inference backend (embedding + generation).
#[async_trait]
pub trait InferenceBackend: EmbeddingBackend + GenerationBackend {
    /// Check if the backend is available and responding.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// TEXT EXTRACTION
// =============================================================================

/// Decodes uploaded bytes into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Whether this extractor can decode `format` (a file extension or MIME type).
    fn supports(&self, format: &str) -> bool;

    /// Decode `bytes`. Fails with `UnsupportedFormat` for formats it cannot read.
    async fn extract(&self, bytes: &[u8], format: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_contains() {
        let doc = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(RetrievalScope::All.contains(doc));
        assert!(RetrievalScope::Document(doc).contains(doc));
        assert!(!RetrievalScope::Document(doc).contains(other));
    }

    #[test]
    fn test_scope_document_id() {
        let doc = Uuid::new_v4();
        assert_eq!(RetrievalScope::All.document_id(), None);
        assert_eq!(RetrievalScope::Document(doc).document_id(), Some(doc));
        assert_eq!(RetrievalScope::default(), RetrievalScope::All);
    }
}
