//! Public entry points: submit documents, poll jobs, fetch test cases.
//!
//! Each submission creates a job and runs it on its own tokio task. The task
//! holds the job's [`JobWriter`] for its whole lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use caseforge_core::{
    Document, DocumentStatus, Error, EventBus, JobStatusReport, JobType, PipelineEvent,
    ProcessingJob, Result, TestCase,
};
use caseforge_inference::{EmbeddingAdapter, GenerationAdapter, InferenceStack};

use crate::extraction::ExtractorRegistry;
use crate::orchestrator::{ExtractionOutcome, Orchestrator, OrchestratorConfig, RunReport};
use crate::stores::Stores;
use crate::tracker::{JobTracker, JobWriter};

type Tasks = Mutex<HashMap<Uuid, JoinHandle<()>>>;

struct Inner {
    stores: Stores,
    tracker: JobTracker,
    orchestrator: Orchestrator,
    extractors: ExtractorRegistry,
    tasks: Tasks,
}

/// Handle to the test case generation pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    pub fn builder(
        stores: Stores,
        embedder: EmbeddingAdapter,
        generator: GenerationAdapter,
    ) -> PipelineBuilder {
        PipelineBuilder::new(stores, embedder, generator)
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.inner.tracker
    }

    /// Start a test generation job for `document`.
    ///
    /// Fails with `ConcurrencyViolation` while a test generation job for the
    /// same document is pending or processing.
    pub async fn submit_document(&self, document: Document) -> Result<Uuid> {
        let (job, writer) = self
            .open_job(&document, JobType::TestGeneration, true)
            .await?;

        let span = info_span!("generation_job", job_id = %job.id, document_id = %document.id);
        let inner = self.inner.clone();
        let handle = tokio::spawn(run_generation(inner, writer, document).instrument(span));
        self.track(job.id, handle);
        Ok(job.id)
    }

    /// Decode uploaded bytes, then start test generation on the text.
    ///
    /// Decoding runs as a `text_extraction` job. An undecodable format fails
    /// that job and is returned as `UnsupportedFormat`. Returns the id of the
    /// test generation job.
    pub async fn submit_upload(
        &self,
        document_id: Uuid,
        name: &str,
        bytes: &[u8],
        format: &str,
    ) -> Result<Uuid> {
        let mut placeholder = Document::with_id(document_id, name, "");
        placeholder.byte_size = bytes.len() as i64;
        let (_, mut writer) = self
            .open_job(&placeholder, JobType::TextExtraction, false)
            .await?;
        writer.start().await?;

        let text = match self.inner.extractors.extract(bytes, format).await {
            Ok(text) => text,
            Err(e) => {
                writer.fail(&e, None).await?;
                return Err(e);
            }
        };
        writer
            .complete(Some(json!({
                "format": format,
                "byte_size": bytes.len(),
                "char_count": text.chars().count(),
            })))
            .await?;

        let mut document = Document::with_id(document_id, name, text);
        document.byte_size = bytes.len() as i64;
        self.submit_document(document).await
    }

    /// Chunk and embed `document` without generating test cases.
    pub async fn submit_embedding(&self, document: Document) -> Result<Uuid> {
        let (job, writer) = self.open_job(&document, JobType::Embedding, false).await?;

        let span = info_span!("embedding_job", job_id = %job.id, document_id = %document.id);
        let inner = self.inner.clone();
        let handle = tokio::spawn(run_embedding(inner, writer, document).instrument(span));
        self.track(job.id, handle);
        Ok(job.id)
    }

    /// Create a job and take its writer, making sure the document row exists.
    ///
    /// An unknown document is stored before its job so the job can reference
    /// it. A known document is overwritten, when `overwrite` is set, only
    /// after the job was created: a rejected duplicate submission leaves the
    /// document of the running job untouched.
    async fn open_job(
        &self,
        document: &Document,
        job_type: JobType,
        overwrite: bool,
    ) -> Result<(ProcessingJob, JobWriter)> {
        let documents = &self.inner.stores.documents;
        let known = documents.get(document.id).await?.is_some();
        if !known {
            documents.insert(document).await?;
        }

        let job = self.inner.tracker.create(document.id, job_type).await?;
        let writer = self.inner.tracker.writer(&job)?;
        if known && overwrite {
            if let Err(e) = documents.insert(document).await {
                writer.fail(&e, None).await?;
                return Err(e);
            }
        }
        Ok((job, writer))
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> Result<JobStatusReport> {
        self.inner.tracker.status(job_id).await
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<ProcessingJob> {
        self.inner.tracker.get(job_id).await
    }

    pub async fn get_document(&self, document_id: Uuid) -> Result<Document> {
        self.inner
            .stores
            .documents
            .get(document_id)
            .await?
            .ok_or(Error::DocumentNotFound(document_id))
    }

    /// Test cases of a document, in category then creation order. After a
    /// quota shortfall this is the partial set.
    pub async fn get_test_cases(&self, document_id: Uuid) -> Result<Vec<TestCase>> {
        self.get_document(document_id).await?;
        self.inner
            .stores
            .test_cases
            .list_for_document(document_id)
            .await
    }

    /// Cancel a job. Returns false when it had already finished.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<bool> {
        self.inner.tracker.cancel(job_id).await
    }

    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.tracker.events().subscribe()
    }

    /// Wait for a job's task to finish and return its final status.
    pub async fn wait(&self, job_id: Uuid) -> Result<JobStatusReport> {
        let handle = lock_tasks(&self.inner.tasks).remove(&job_id);
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| Error::Internal(format!("job task {} failed: {}", job_id, e)))?;
        }
        self.get_job_status(job_id).await
    }

    fn track(&self, job_id: Uuid, handle: JoinHandle<()>) {
        let mut tasks = lock_tasks(&self.inner.tasks);
        tasks.retain(|_, h| !h.is_finished());
        tasks.insert(job_id, handle);
    }
}

fn lock_tasks(tasks: &Tasks) -> std::sync::MutexGuard<'_, HashMap<Uuid, JoinHandle<()>>> {
    tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_generation(inner: Arc<Inner>, mut writer: JobWriter, document: Document) {
    let documents = inner.stores.documents.clone();
    let outcome: Result<RunReport> = async {
        writer.start().await?;
        writer.check_cancelled().await?;
        documents
            .update_status(document.id, DocumentStatus::Processing)
            .await?;
        inner.orchestrator.run(&mut writer, &document).await
    }
    .await;

    let finished: Result<()> = async {
        // Only a job this task finalized moves the document forward; a job
        // cancelled underneath it returns the document to `uploaded`.
        let status = match outcome {
            Ok(report) => {
                let summary = report.summary();
                match report.shortfall() {
                    None => writer
                        .complete(Some(summary))
                        .await?
                        .then_some(DocumentStatus::Completed),
                    Some(shortfall) => writer
                        .fail(&shortfall, Some(summary))
                        .await?
                        .then_some(DocumentStatus::Failed),
                }
            }
            Err(Error::Cancelled(_)) => {
                writer.finish_cancelled().await?;
                None
            }
            Err(e) => writer.fail(&e, None).await?.then_some(DocumentStatus::Failed),
        };
        documents
            .update_status(document.id, status.unwrap_or(DocumentStatus::Uploaded))
            .await
    }
    .await;

    if let Err(e) = finished {
        error!(document_id = %document.id, error = %e, "Failed to finalize generation job");
    }
}

async fn run_embedding(inner: Arc<Inner>, mut writer: JobWriter, document: Document) {
    let outcome: Result<ExtractionOutcome> = async {
        writer.start().await?;
        writer.check_cancelled().await?;
        inner.orchestrator.extract(&mut writer, &document).await
    }
    .await;

    let finished = match outcome {
        Ok(extraction) => {
            let summary = serde_json::to_value(&extraction).ok();
            writer.complete(summary).await
        }
        Err(Error::Cancelled(_)) => writer.finish_cancelled().await,
        Err(e) => writer.fail(&e, None).await,
    };
    if let Err(e) = finished {
        error!(document_id = %document.id, error = %e, "Failed to finalize embedding job");
    }
}

/// Assembles a [`Pipeline`].
pub struct PipelineBuilder {
    stores: Stores,
    embedder: EmbeddingAdapter,
    generator: GenerationAdapter,
    config: OrchestratorConfig,
    extractors: ExtractorRegistry,
    events: EventBus,
}

impl PipelineBuilder {
    pub fn new(stores: Stores, embedder: EmbeddingAdapter, generator: GenerationAdapter) -> Self {
        Self {
            stores,
            embedder,
            generator,
            config: OrchestratorConfig::default(),
            extractors: ExtractorRegistry::default(),
            events: EventBus::default(),
        }
    }

    /// Builder over the adapters of an [`InferenceStack`].
    pub fn from_stack(stores: Stores, stack: &InferenceStack) -> Self {
        Self::new(stores, stack.embedder.clone(), stack.generator.clone())
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let orchestrator = Orchestrator::new(
            self.config,
            self.embedder,
            self.generator,
            self.stores.vectors.clone(),
            self.stores.test_cases.clone(),
        )?;
        let tracker = JobTracker::new(self.stores.jobs.clone(), self.events);
        info!(
            subsystem = "jobs",
            component = "pipeline",
            chunk_size = orchestrator.config().chunker.chunk_size,
            overlap = orchestrator.config().chunker.overlap,
            test_cases_per_document = orchestrator.config().test_cases_per_document,
            "Pipeline ready"
        );
        Ok(Pipeline {
            inner: Arc::new(Inner {
                stores: self.stores,
                tracker,
                orchestrator,
                extractors: self.extractors,
                tasks: Mutex::new(HashMap::new()),
            }),
        })
    }
}
