//! Core data models for caseforge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::defaults;

pub use pgvector::Vector;

// =============================================================================
// DOCUMENT TYPES
// =============================================================================

/// Lifecycle of an uploaded document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uploaded" => Ok(Self::Uploaded),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid document status: {}", s)),
        }
    }
}

/// A business document whose text has already been extracted.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    pub content: String,
    pub byte_size: i64,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Build a new document in the `uploaded` state.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_id(crate::uuid_utils::new_v7(), name, content)
    }

    /// Build a new document with a caller-chosen id.
    pub fn with_id(id: Uuid, name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            byte_size: content.len() as i64,
            content,
            status: DocumentStatus::Uploaded,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// CHUNK TYPES
// =============================================================================

/// A contiguous span of a document's normalized text, optionally embedded.
///
/// `start_char`/`end_char` are character (not byte) offsets, end exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub ordinal: i32,
    pub text: String,
    pub start_char: i32,
    pub end_char: i32,
    #[serde(skip)]
    pub embedding: Option<Vector>,
}

impl Chunk {
    /// Build an unembedded chunk with its deterministic id.
    pub fn new(
        document_id: Uuid,
        ordinal: i32,
        text: impl Into<String>,
        start_char: i32,
        end_char: i32,
    ) -> Self {
        let text = text.into();
        Self {
            id: chunk_id(document_id, ordinal, &text),
            document_id,
            ordinal,
            text,
            start_char,
            end_char,
            embedding: None,
        }
    }

    /// Attach an embedding, consuming the chunk.
    pub fn with_embedding(mut self, embedding: Vector) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Deterministic chunk id: the first 16 bytes of SHA-256 over
/// `document_id | ordinal | text`.
///
/// Reprocessing the same document with the same chunking settings yields the
/// same ids, which keeps vector store inserts idempotent.
pub fn chunk_id(document_id: Uuid, ordinal: i32, text: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b"|");
    hasher.update(ordinal.to_be_bytes());
    hasher.update(b"|");
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// A retrieved chunk with its cosine distance to the query (lower is closer).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are final: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Type of processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Decode uploaded bytes into document text
    TextExtraction,
    /// Chunk and embed a document
    Embedding,
    /// Full pipeline: extraction, validation, generation
    TestGeneration,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextExtraction => "text_extraction",
            Self::Embedding => "embedding",
            Self::TestGeneration => "test_generation",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text_extraction" => Ok(Self::TextExtraction),
            "embedding" => Ok(Self::Embedding),
            "test_generation" => Ok(Self::TestGeneration),
            _ => Err(format!("Invalid job type: {}", s)),
        }
    }
}

/// A tracked unit of asynchronous work for one document.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub document_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress_percent: i32,
    pub progress_message: Option<String>,
    pub total_items: Option<i32>,
    pub error_message: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub result: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    /// Build a pending job.
    pub fn new(document_id: Uuid, job_type: JobType) -> Self {
        Self {
            id: crate::uuid_utils::new_v7(),
            document_id,
            job_type,
            status: JobStatus::Pending,
            progress_percent: 0,
            progress_message: None,
            total_items: None,
            error_message: None,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Externally visible status summary.
    pub fn report(&self) -> JobStatusReport {
        JobStatusReport {
            job_id: self.id,
            document_id: self.document_id,
            job_type: self.job_type,
            status: self.status,
            progress: self.progress_percent,
            message: self.progress_message.clone(),
            error: self.error_message.clone(),
        }
    }
}

/// Result of `get_job_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JobStatusReport {
    pub job_id: Uuid,
    pub document_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// TEST CASE TYPES
// =============================================================================

/// Test case category. Declaration order is the generation and listing order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    Functional,
    EdgeCase,
    Compliance,
    Integration,
}

impl TestCategory {
    /// All categories in generation order.
    pub const ALL: [TestCategory; 4] = [
        TestCategory::Functional,
        TestCategory::EdgeCase,
        TestCategory::Compliance,
        TestCategory::Integration,
    ];

    /// Share of a 15-case batch.
    pub fn weight(&self) -> usize {
        match self {
            Self::Functional => 6,
            Self::EdgeCase => 5,
            Self::Compliance => 3,
            Self::Integration => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Functional => "functional",
            Self::EdgeCase => "edge_case",
            Self::Compliance => "compliance",
            Self::Integration => "integration",
        }
    }

    /// Priority used when the model does not supply one.
    pub fn default_priority(&self) -> Priority {
        match self {
            Self::Functional | Self::Compliance => Priority::High,
            Self::EdgeCase | Self::Integration => Priority::Medium,
        }
    }

    /// Severity used when the model does not supply one.
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::Compliance => Severity::High,
            Self::Functional | Self::EdgeCase | Self::Integration => Severity::Medium,
        }
    }

    /// Persona used when the model does not supply one.
    pub fn default_persona(&self) -> &'static str {
        match self {
            Self::Functional => "End User",
            Self::EdgeCase => "QA Engineer",
            Self::Compliance => "Compliance Officer",
            Self::Integration => "System Integrator",
        }
    }

    /// Retrieval query used to gather context for this category.
    pub fn retrieval_query(&self) -> &'static str {
        match self {
            Self::Functional => "core features, user workflows and expected system behavior",
            Self::EdgeCase => "limits, boundaries, exceptions, invalid input and error handling",
            Self::Compliance => "regulatory, legal, policy, audit and security requirements",
            Self::Integration => "interfaces, external systems, data exchange and dependencies",
        }
    }
}

impl std::fmt::Display for TestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TestCategory {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match key.as_str() {
            "functional" => Ok(Self::Functional),
            "edge_case" => Ok(Self::EdgeCase),
            "compliance" => Ok(Self::Compliance),
            "integration" => Ok(Self::Integration),
            _ => Err(format!("Invalid test category: {}", s)),
        }
    }
}

/// Test case priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Test case severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// Origin of a test case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TestCaseSource {
    #[default]
    Generated,
    Manual,
    Uploaded,
}

impl TestCaseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Manual => "manual",
            Self::Uploaded => "uploaded",
        }
    }
}

impl std::str::FromStr for TestCaseSource {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generated" => Ok(Self::Generated),
            "manual" => Ok(Self::Manual),
            "uploaded" => Ok(Self::Uploaded),
            _ => Err(format!("Invalid test case source: {}", s)),
        }
    }
}

/// Manual execution outcome of a test case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    NotRun,
    Passed,
    Failed,
    Blocked,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRun => "not_run",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "not_run" => Ok(Self::NotRun),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "blocked" => Ok(Self::Blocked),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }
}

/// A classified test case attached to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TestCase {
    pub id: Uuid,
    pub document_id: Uuid,
    pub title: String,
    pub description: String,
    pub steps: Vec<String>,
    pub expected_result: String,
    pub tags: Vec<String>,
    pub category: TestCategory,
    pub priority: Priority,
    pub severity: Severity,
    pub persona: String,
    pub source: TestCaseSource,
    /// Present only for generated cases.
    pub confidence_score: Option<f32>,
    /// Chunk ids that grounded the generation call.
    pub context_used: Vec<Uuid>,
    pub execution_status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
}

/// A rule extracted from the document during validation, with the chunks that
/// support it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub rule: String,
    pub supporting_chunk_ids: Vec<Uuid>,
}

// =============================================================================
// QUOTA
// =============================================================================

/// Per-category target counts for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryQuota {
    pub total: usize,
    counts: [(TestCategory, usize); 4],
}

impl CategoryQuota {
    /// Split `total` by the 6/5/3/1 weights: each category receives
    /// `floor(total * weight / 15)`, the remainder goes to functional.
    pub fn for_total(total: usize) -> Self {
        let weight_sum: usize = TestCategory::ALL.iter().map(|c| c.weight()).sum();
        let mut counts = TestCategory::ALL.map(|c| (c, total * c.weight() / weight_sum));
        let assigned: usize = counts.iter().map(|(_, n)| n).sum();
        counts[0].1 += total - assigned;
        Self { total, counts }
    }

    /// Target count for one category.
    pub fn count(&self, category: TestCategory) -> usize {
        self.counts
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    /// Categories and their targets, in generation order.
    pub fn iter(&self) -> impl Iterator<Item = (TestCategory, usize)> + '_ {
        self.counts.iter().copied()
    }
}

impl Default for CategoryQuota {
    fn default() -> Self {
        Self::for_total(defaults::TEST_CASES_PER_DOCUMENT)
    }
}
