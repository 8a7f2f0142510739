//! Repository bundles the pipeline runs on.
//!
//! [`Stores::postgres`] wires the `caseforge-db` repositories;
//! [`Stores::in_memory`] wires the process-local ones below, which give the
//! same guarantees as the SQL implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use caseforge_core::{
    Document, DocumentRepository, DocumentStatus, Error, JobRepository, JobStatus, JobType,
    ProcessingJob, Result, TestCase, TestCaseRepository, VectorStore,
};
use caseforge_db::Database;
use caseforge_search::InMemoryVectorStore;

/// Every repository the pipeline needs.
#[derive(Clone)]
pub struct Stores {
    pub documents: Arc<dyn DocumentRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub test_cases: Arc<dyn TestCaseRepository>,
    pub vectors: Arc<dyn VectorStore>,
}

impl Stores {
    /// Process-local stores for embeddings of `dimension`.
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            documents: Arc::new(InMemoryDocumentRepository::new()),
            jobs: Arc::new(InMemoryJobRepository::new()),
            test_cases: Arc::new(InMemoryTestCaseRepository::new()),
            vectors: Arc::new(InMemoryVectorStore::new(dimension)),
        }
    }

    pub fn postgres(db: &Database) -> Self {
        Self {
            documents: Arc::new(db.documents.clone()),
            jobs: Arc::new(db.jobs.clone()),
            test_cases: Arc::new(db.test_cases.clone()),
            vectors: Arc::new(db.vectors.clone()),
        }
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

#[derive(Default)]
pub struct InMemoryDocumentRepository {
    documents: RwLock<HashMap<Uuid, Document>>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn insert(&self, document: &Document) -> Result<()> {
        self.documents
            .write()
            .await
            .insert(document.id, document.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.documents.read().await.get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: DocumentStatus) -> Result<()> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(Error::DocumentNotFound(id))?;
        document.status = status;
        document.updated_at = Utc::now();
        Ok(())
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// In-memory job repository. A single mutex makes the active-job check and
/// the insert one atomic step.
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, ProcessingJob>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to a non-terminal job. Returns false for terminal or unknown jobs.
    async fn transition<F>(&self, job_id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut ProcessingJob),
    {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&job_id) {
            Some(job) if !job.status.is_terminal() => {
                f(job);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create_exclusive(
        &self,
        document_id: Uuid,
        job_type: JobType,
    ) -> Result<ProcessingJob> {
        let mut jobs = self.jobs.lock().await;
        let active = jobs.values().any(|j| {
            j.document_id == document_id && j.job_type == job_type && !j.status.is_terminal()
        });
        if active {
            return Err(Error::ConcurrencyViolation {
                document_id,
                job_type: job_type.to_string(),
            });
        }
        let job = ProcessingJob::new(document_id, job_type);
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn mark_processing(&self, job_id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()> {
        let percent = percent.clamp(0, 100);
        self.transition(job_id, |job| {
            if percent >= job.progress_percent {
                job.progress_percent = percent;
                if let Some(message) = message {
                    job.progress_message = Some(message.to_string());
                }
            }
        })
        .await;
        Ok(())
    }

    async fn set_total_items(&self, job_id: Uuid, total: i32) -> Result<()> {
        if let Some(job) = self.jobs.lock().await.get_mut(&job_id) {
            job.total_items = Some(total);
        }
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<bool> {
        Ok(self
            .transition(job_id, |job| {
                job.status = JobStatus::Completed;
                job.progress_percent = 100;
                job.result = result;
                job.completed_at = Some(Utc::now());
            })
            .await)
    }

    async fn fail(&self, job_id: Uuid, error: &str, result: Option<JsonValue>) -> Result<bool> {
        Ok(self
            .transition(job_id, |job| {
                job.status = JobStatus::Failed;
                if job.error_message.is_none() {
                    job.error_message = Some(error.to_string());
                }
                if result.is_some() {
                    job.result = result;
                }
                job.completed_at = Some(Utc::now());
            })
            .await)
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        Ok(self
            .transition(job_id, |job| {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
            })
            .await)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ProcessingJob>> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }

    async fn active_for_document(
        &self,
        document_id: Uuid,
        job_type: JobType,
    ) -> Result<Option<ProcessingJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .find(|j| {
                j.document_id == document_id && j.job_type == job_type && !j.status.is_terminal()
            })
            .cloned())
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingJob>> {
        let mut jobs: Vec<ProcessingJob> = self
            .jobs
            .lock()
            .await
            .values()
            .filter(|j| j.document_id == document_id)
            .cloned()
            .collect();
        // v7 ids order by creation time
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }
}

// =============================================================================
// TEST CASES
// =============================================================================

#[derive(Default)]
pub struct InMemoryTestCaseRepository {
    cases: RwLock<HashMap<Uuid, Vec<TestCase>>>,
}

impl InMemoryTestCaseRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TestCaseRepository for InMemoryTestCaseRepository {
    async fn replace_for_document(&self, document_id: Uuid, cases: &[TestCase]) -> Result<()> {
        self.cases
            .write()
            .await
            .insert(document_id, cases.to_vec());
        Ok(())
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<TestCase>> {
        let mut cases = self
            .cases
            .read()
            .await
            .get(&document_id)
            .cloned()
            .unwrap_or_default();
        // stable: insertion order is creation order within a category
        cases.sort_by_key(|c| c.category);
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_core::{
        new_v7, ExecutionStatus, Priority, Severity, TestCaseSource, TestCategory,
    };

    fn case(document_id: Uuid, title: &str, category: TestCategory) -> TestCase {
        TestCase {
            id: new_v7(),
            document_id,
            title: title.to_string(),
            description: String::new(),
            steps: vec![],
            expected_result: String::new(),
            tags: vec![],
            category,
            priority: Priority::Medium,
            severity: Severity::Medium,
            persona: "QA".to_string(),
            source: TestCaseSource::Generated,
            confidence_score: Some(0.8),
            context_used: vec![],
            execution_status: ExecutionStatus::NotRun,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_exclusive_job_creation() {
        let repo = InMemoryJobRepository::new();
        let doc = Uuid::new_v4();
        let first = repo.create_exclusive(doc, JobType::TestGeneration).await.unwrap();

        assert!(matches!(
            repo.create_exclusive(doc, JobType::TestGeneration).await,
            Err(Error::ConcurrencyViolation { .. })
        ));
        // other job types and documents are independent
        assert!(repo.create_exclusive(doc, JobType::Embedding).await.is_ok());
        assert!(repo
            .create_exclusive(Uuid::new_v4(), JobType::TestGeneration)
            .await
            .is_ok());

        repo.complete(first.id, None).await.unwrap();
        let second = repo.create_exclusive(doc, JobType::TestGeneration).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let repo = InMemoryJobRepository::new();
        let job = repo
            .create_exclusive(Uuid::new_v4(), JobType::Embedding)
            .await
            .unwrap();
        assert!(repo.mark_processing(job.id).await.unwrap());
        assert!(!repo.mark_processing(job.id).await.unwrap());
        assert!(repo.cancel(job.id).await.unwrap());

        assert!(!repo.complete(job.id, None).await.unwrap());
        assert!(!repo.fail(job.id, "late", None).await.unwrap());
        repo.update_progress(job.id, 90, None).await.unwrap();

        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(stored.progress_percent, 0);
        assert_eq!(stored.error_message, None);
    }

    #[tokio::test]
    async fn test_first_error_wins() {
        let repo = InMemoryJobRepository::new();
        let job = repo
            .create_exclusive(Uuid::new_v4(), JobType::TestGeneration)
            .await
            .unwrap();
        assert!(repo.fail(job.id, "root cause", None).await.unwrap());
        assert!(!repo.fail(job.id, "follow-up", None).await.unwrap());
        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("root cause"));
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let repo = InMemoryJobRepository::new();
        let job = repo
            .create_exclusive(Uuid::new_v4(), JobType::TestGeneration)
            .await
            .unwrap();
        repo.update_progress(job.id, 60, Some("generating")).await.unwrap();
        repo.update_progress(job.id, 10, Some("stale")).await.unwrap();
        repo.update_progress(job.id, 250, None).await.unwrap();
        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.progress_percent, 100);
        assert_eq!(stored.progress_message.as_deref(), Some("generating"));
    }

    #[tokio::test]
    async fn test_active_and_list_for_document() {
        let repo = InMemoryJobRepository::new();
        let doc = Uuid::new_v4();
        let job = repo.create_exclusive(doc, JobType::Embedding).await.unwrap();
        assert_eq!(
            repo.active_for_document(doc, JobType::Embedding)
                .await
                .unwrap()
                .map(|j| j.id),
            Some(job.id)
        );
        repo.complete(job.id, None).await.unwrap();
        assert!(repo
            .active_for_document(doc, JobType::Embedding)
            .await
            .unwrap()
            .is_none());
        assert_eq!(repo.list_for_document(doc).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_document_status_update() {
        let repo = InMemoryDocumentRepository::new();
        let doc = Document::new("policy.md", "text");
        repo.insert(&doc).await.unwrap();
        repo.update_status(doc.id, DocumentStatus::Processing)
            .await
            .unwrap();
        assert_eq!(
            repo.get(doc.id).await.unwrap().unwrap().status,
            DocumentStatus::Processing
        );
        assert!(matches!(
            repo.update_status(Uuid::new_v4(), DocumentStatus::Failed).await,
            Err(Error::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_test_cases_ordered_by_category_then_creation() {
        let repo = InMemoryTestCaseRepository::new();
        let doc = Uuid::new_v4();
        let cases = vec![
            case(doc, "integration", TestCategory::Integration),
            case(doc, "functional 1", TestCategory::Functional),
            case(doc, "edge", TestCategory::EdgeCase),
            case(doc, "functional 2", TestCategory::Functional),
        ];
        repo.replace_for_document(doc, &cases).await.unwrap();
        let titles: Vec<String> = repo
            .list_for_document(doc)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["functional 1", "functional 2", "edge", "integration"]);

        repo.replace_for_document(doc, &cases[..1]).await.unwrap();
        assert_eq!(repo.list_for_document(doc).await.unwrap().len(), 1);
        assert!(repo
            .list_for_document(Uuid::new_v4())
            .await
            .unwrap()
            .is_empty());
    }
}
