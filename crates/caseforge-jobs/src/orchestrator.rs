//! Per-document generation workflow: extraction, validation, generation.
//!
//! The orchestrator owns no job state. It reports through the [`JobWriter`]
//! it is handed and checks for cancellation between phases.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use caseforge_core::defaults;
use caseforge_core::{
    BusinessRule, CategoryQuota, Chunk, Document, Error, Phase, Result, RetrievalScope,
    TestCase, TestCaseRepository, TestCategory, VectorStore,
};
use caseforge_db::{normalize_text, ChunkerConfig, SlidingWindowChunker};
use caseforge_inference::{EmbeddingAdapter, GenerationAdapter};
use caseforge_search::Retriever;

use crate::assembler::TestCaseAssembler;
use crate::prompts::{
    generation_prompt, validation_prompt, ContextLabels, GENERATION_SYSTEM_PROMPT,
    VALIDATION_SYSTEM_PROMPT,
};
use crate::schema::{parse_candidates, parse_rules};
use crate::tracker::JobWriter;

/// Tuning for one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub chunker: ChunkerConfig,
    /// Embedding batches in flight per document.
    pub embed_concurrency: usize,
    /// Chunks retrieved per query.
    pub top_k: usize,
    pub test_cases_per_document: usize,
    /// Attempts per category, and for rule extraction.
    pub max_attempts: u32,
    /// Most candidates requested in one generation call.
    pub batch_max: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            embed_concurrency: defaults::EMBED_CONCURRENCY,
            top_k: defaults::RETRIEVAL_TOP_K,
            test_cases_per_document: defaults::TEST_CASES_PER_DOCUMENT,
            max_attempts: defaults::GENERATION_MAX_ATTEMPTS,
            batch_max: defaults::GENERATION_BATCH_MAX,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl OrchestratorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CHUNK_SIZE` | `1000` | Characters per chunk |
    /// | `CHUNK_OVERLAP` | `200` | Characters shared by adjacent chunks |
    /// | `EMBED_CONCURRENCY` | `4` | Embedding batches in flight |
    /// | `RETRIEVAL_TOP_K` | `8` | Chunks retrieved per query |
    /// | `TEST_CASES_PER_DOCUMENT` | `15` | Test cases per document |
    /// | `GENERATION_MAX_ATTEMPTS` | `3` | Attempts per category |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chunker: ChunkerConfig::from_env(),
            embed_concurrency: env_or("EMBED_CONCURRENCY", defaults.embed_concurrency).max(1),
            top_k: env_or("RETRIEVAL_TOP_K", defaults.top_k),
            test_cases_per_document: env_or(
                "TEST_CASES_PER_DOCUMENT",
                defaults.test_cases_per_document,
            ),
            max_attempts: env_or("GENERATION_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            batch_max: defaults.batch_max,
        }
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_test_cases_per_document(mut self, total: usize) -> Self {
        self.test_cases_per_document = total;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

/// A chunk that could not be embedded.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
    pub ordinal: i32,
    pub error: String,
}

/// What the extraction phase did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionOutcome {
    pub chunk_count: usize,
    /// Newly embedded and stored.
    pub embedded: usize,
    /// Already stored from an earlier run.
    pub reused: usize,
    /// Stored chunks of earlier content that were dropped.
    pub removed: usize,
    pub failed: Vec<ChunkFailure>,
}

/// Per-category generation result.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryOutcome {
    pub category: TestCategory,
    pub required: usize,
    pub accepted: usize,
    pub attempts: u32,
}

/// Outcome of a full run. Test cases are already persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub extraction: ExtractionOutcome,
    pub rules: usize,
    pub categories: Vec<CategoryOutcome>,
    pub produced: usize,
    pub required: usize,
}

impl RunReport {
    /// `QuotaShortfall` when fewer cases were produced than required.
    pub fn shortfall(&self) -> Option<Error> {
        (self.produced < self.required).then_some(Error::QuotaShortfall {
            produced: self.produced,
            required: self.required,
        })
    }

    /// JSON summary stored as the job result.
    pub fn summary(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Runs the phases for one document.
#[derive(Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    chunker: SlidingWindowChunker,
    embedder: EmbeddingAdapter,
    generator: GenerationAdapter,
    retriever: Retriever,
    vectors: Arc<dyn VectorStore>,
    test_cases: Arc<dyn TestCaseRepository>,
}

impl Orchestrator {
    /// Fails with `InvalidInput` for an unusable chunker configuration and
    /// with `Config` when the embedder and store disagree on dimension.
    pub fn new(
        config: OrchestratorConfig,
        embedder: EmbeddingAdapter,
        generator: GenerationAdapter,
        vectors: Arc<dyn VectorStore>,
        test_cases: Arc<dyn TestCaseRepository>,
    ) -> Result<Self> {
        let chunker = SlidingWindowChunker::new(config.chunker)?;
        if embedder.dimension() != vectors.dimension() {
            return Err(Error::Config(format!(
                "embedding dimension {} does not match vector store dimension {}",
                embedder.dimension(),
                vectors.dimension()
            )));
        }
        Ok(Self {
            config,
            chunker,
            embedder,
            generator,
            retriever: Retriever::new(vectors.clone()),
            vectors,
            test_cases,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Extraction, validation and generation, persisting the produced cases.
    ///
    /// A shortfall is not an error here; see [`RunReport::shortfall`].
    #[instrument(
        skip(self, writer, document),
        fields(subsystem = "jobs", component = "orchestrator", op = "run", document_id = %document.id, job_id = %writer.job_id())
    )]
    pub async fn run(&self, writer: &mut JobWriter, document: &Document) -> Result<RunReport> {
        let start = Instant::now();

        let extraction = self.extract(writer, document).await?;
        writer.check_cancelled().await?;

        let rules = self.validate(writer, document.id).await?;
        writer.check_cancelled().await?;

        let (cases, categories) = self.generate(writer, document.id, &rules).await?;
        writer.check_cancelled().await?;

        self.test_cases
            .replace_for_document(document.id, &cases)
            .await?;

        let report = RunReport {
            extraction,
            rules: rules.len(),
            categories,
            produced: cases.len(),
            required: self.config.test_cases_per_document,
        };

        let duration_ms = start.elapsed().as_millis();
        info!(
            produced = report.produced,
            required = report.required,
            duration_ms = duration_ms as u64,
            "Generation run finished"
        );
        if duration_ms > defaults::SLOW_OPERATION_MS {
            warn!(slow = true, duration_ms = duration_ms as u64, "Slow generation run");
        }
        Ok(report)
    }

    /// Chunk, embed and store the document. Chunks already stored are reused.
    #[instrument(
        skip(self, writer, document),
        fields(subsystem = "jobs", component = "orchestrator", op = "extract", document_id = %document.id)
    )]
    pub async fn extract(
        &self,
        writer: &mut JobWriter,
        document: &Document,
    ) -> Result<ExtractionOutcome> {
        writer.phase(Phase::Extraction);
        writer
            .progress(defaults::PROGRESS_EXTRACTION_START, Some("chunking document"))
            .await?;

        let text = normalize_text(&document.content);
        let chunks = self.chunker.chunk_document(document.id, &text);
        if chunks.is_empty() {
            return Err(Error::InvalidInput(format!(
                "document {} has no text to ground generation on",
                document.id
            )));
        }
        writer.set_total_items(chunks.len()).await?;

        let stored: HashSet<Uuid> = self
            .vectors
            .chunks_for_document(document.id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let (reused, pending): (Vec<Chunk>, Vec<Chunk>) =
            chunks.iter().cloned().partition(|c| stored.contains(&c.id));

        debug!(
            chunk_count = chunks.len(),
            reused = reused.len(),
            pending = pending.len(),
            "Document chunked"
        );

        let mut outcome = ExtractionOutcome {
            chunk_count: chunks.len(),
            reused: reused.len(),
            ..Default::default()
        };
        let mut embedded: Vec<Chunk> = Vec::with_capacity(pending.len());

        let batch_size = self.embedder.batch_size().max(1);
        let batches: Vec<Vec<Chunk>> = pending.chunks(batch_size).map(|b| b.to_vec()).collect();
        let embedder = &self.embedder;
        let mut results = stream::iter(batches)
            .map(|batch| async move {
                let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                let vectors = embedder.embed_batch(&texts).await;
                (batch, vectors)
            })
            .buffer_unordered(self.config.embed_concurrency.max(1));

        let span = defaults::PROGRESS_EXTRACTION_END - defaults::PROGRESS_EXTRACTION_START;
        let mut processed = 0usize;
        while let Some((batch, vectors)) = results.next().await {
            for (chunk, result) in batch.into_iter().zip(vectors) {
                match result {
                    Ok(vector) => {
                        trace!(ordinal = chunk.ordinal, "Chunk embedded");
                        embedded.push(chunk.with_embedding(vector));
                    }
                    Err(e) if e.is_transient() => return Err(e),
                    Err(e) => {
                        warn!(ordinal = chunk.ordinal, error = %e, "Skipping chunk that failed to embed");
                        outcome.failed.push(ChunkFailure {
                            ordinal: chunk.ordinal,
                            error: e.to_string(),
                        });
                    }
                }
                processed += 1;
            }
            let percent = defaults::PROGRESS_EXTRACTION_START
                + (span as usize * processed / pending.len()) as i32;
            writer.progress(percent, Some("embedding chunks")).await?;
        }
        drop(results);

        if embedded.is_empty() && reused.is_empty() {
            let cause = outcome
                .failed
                .first()
                .map(|f| f.error.clone())
                .unwrap_or_default();
            return Err(Error::PermanentService(format!(
                "no chunk of document {} could be embedded: {}",
                document.id, cause
            )));
        }

        // Nothing from an interrupted phase is persisted.
        writer.check_cancelled().await?;

        // Content changed since the last run: its chunks no longer ground anything.
        if stored.len() > reused.len() {
            let keep: Vec<Uuid> = chunks.iter().map(|c| c.id).collect();
            outcome.removed = self
                .vectors
                .retain_for_document(document.id, &keep)
                .await?;
            info!(removed = outcome.removed, "Dropped chunks of earlier document content");
        }

        embedded.sort_by_key(|c| c.ordinal);
        outcome.embedded = self.vectors.insert(&embedded).await?;
        writer
            .progress(defaults::PROGRESS_EXTRACTION_END, Some("chunks stored"))
            .await?;

        info!(
            chunk_count = outcome.chunk_count,
            embedded = outcome.embedded,
            reused = outcome.reused,
            removed = outcome.removed,
            failed = outcome.failed.len(),
            "Extraction complete"
        );
        Ok(outcome)
    }

    /// Extract business rules grounded in the document's own chunks.
    ///
    /// Rules that cite no retrieved chunk are dropped. An empty list is a
    /// valid result: generation then relies on retrieved context alone.
    #[instrument(
        skip(self, writer, document_id),
        fields(subsystem = "jobs", component = "orchestrator", op = "validate", %document_id)
    )]
    pub async fn validate(
        &self,
        writer: &mut JobWriter,
        document_id: Uuid,
    ) -> Result<Vec<BusinessRule>> {
        writer.phase(Phase::Validation);

        let query = self.embedder.embed(defaults::BUSINESS_RULES_QUERY).await?;
        let hits = self
            .retriever
            .retrieve(&query, self.config.top_k, RetrievalScope::Document(document_id))
            .await?;

        let mut rules = Vec::new();
        if hits.is_empty() {
            warn!("No chunks retrieved for rule extraction");
        } else {
            let labels = ContextLabels::new(&hits);
            let prompt = validation_prompt(&hits);

            for attempt in 1..=self.config.max_attempts {
                let response = match self
                    .generator
                    .generate_json(VALIDATION_SYSTEM_PROMPT, &prompt)
                    .await
                {
                    Ok(response) => response,
                    Err(e) if e.is_transient() => return Err(e),
                    Err(e) => {
                        warn!(attempt, error = %e, "Rule extraction call failed");
                        continue;
                    }
                };
                match parse_rules(&response) {
                    Ok(candidates) => {
                        let proposed = candidates.len();
                        rules = labels.ground_rules(candidates);
                        debug!(
                            attempt,
                            proposed,
                            grounded = rules.len(),
                            "Business rules extracted"
                        );
                        break;
                    }
                    Err(e) => warn!(attempt, error = %e, "Unparseable rule list"),
                }
            }
        }

        if rules.is_empty() {
            warn!("No grounded business rules, generating from retrieved context alone");
        }
        writer
            .progress(defaults::PROGRESS_VALIDATION, Some("business rules validated"))
            .await?;
        Ok(rules)
    }

    /// Fill each category quota. Returns the accepted cases without persisting them.
    ///
    /// When a category fails with an error, the cases accepted so far replace
    /// the document's test cases before the error is returned.
    #[instrument(
        skip(self, writer, document_id, rules),
        fields(subsystem = "jobs", component = "orchestrator", op = "generate", %document_id, rule_count = rules.len())
    )]
    pub async fn generate(
        &self,
        writer: &mut JobWriter,
        document_id: Uuid,
        rules: &[BusinessRule],
    ) -> Result<(Vec<TestCase>, Vec<CategoryOutcome>)> {
        writer.phase(Phase::Generation);
        writer
            .progress(defaults::PROGRESS_GENERATION_START, Some("generating test cases"))
            .await?;

        let quota = CategoryQuota::for_total(self.config.test_cases_per_document);
        let mut assembler = TestCaseAssembler::new(document_id);
        let mut cases: Vec<TestCase> = Vec::with_capacity(quota.total);
        let mut outcomes = Vec::new();

        let span = defaults::PROGRESS_GENERATION_END - defaults::PROGRESS_GENERATION_START;
        let category_count = TestCategory::ALL.len();

        for (index, (category, required)) in quota.iter().enumerate() {
            let outcome = match self
                .generate_category(&mut assembler, &mut cases, document_id, category, required, rules)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.keep_partial(writer, document_id, &cases, &e).await;
                    return Err(e);
                }
            };
            writer.category_generated(category, outcome.accepted, required);
            outcomes.push(outcome);

            let percent = defaults::PROGRESS_GENERATION_START
                + (span as usize * (index + 1) / category_count) as i32;
            let message = format!("generated {} test cases", category);
            writer.progress(percent, Some(&message)).await?;
        }

        Ok((cases, outcomes))
    }

    async fn keep_partial(
        &self,
        writer: &JobWriter,
        document_id: Uuid,
        cases: &[TestCase],
        cause: &Error,
    ) {
        if cases.is_empty() || matches!(cause, Error::Cancelled(_)) {
            return;
        }
        if writer.check_cancelled().await.is_err() {
            return;
        }
        match self.test_cases.replace_for_document(document_id, cases).await {
            Ok(()) => warn!(kept = cases.len(), error = %cause, "Generation failed, kept accepted test cases"),
            Err(e) => error!(error = %e, "Failed to persist accepted test cases"),
        }
    }

    async fn generate_category(
        &self,
        assembler: &mut TestCaseAssembler,
        cases: &mut Vec<TestCase>,
        document_id: Uuid,
        category: TestCategory,
        required: usize,
        rules: &[BusinessRule],
    ) -> Result<CategoryOutcome> {
        let mut outcome = CategoryOutcome {
            category,
            required,
            accepted: 0,
            attempts: 0,
        };
        if required == 0 {
            return Ok(outcome);
        }

        let query = self.embedder.embed(category.retrieval_query()).await?;
        let hits = self
            .retriever
            .retrieve(&query, self.config.top_k, RetrievalScope::Document(document_id))
            .await?;
        let context_ids: Vec<Uuid> = hits.iter().map(|h| h.chunk.id).collect();

        while outcome.accepted < required && outcome.attempts < self.config.max_attempts {
            outcome.attempts += 1;
            let attempt = outcome.attempts;
            let missing = required - outcome.accepted;
            let prompt = generation_prompt(
                category,
                missing.min(self.config.batch_max.max(1)),
                rules,
                &hits,
                assembler.accepted_titles(),
            );

            let response = match self
                .generator
                .generate_json(GENERATION_SYSTEM_PROMPT, &prompt)
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(%category, attempt, error = %e, "Generation call failed");
                    continue;
                }
            };
            let candidates = match parse_candidates(&response) {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(%category, attempt, error = %e, "Unparseable test case batch");
                    continue;
                }
            };

            let batch = assembler.assemble(candidates, category, &context_ids, missing);
            for rejection in &batch.rejected {
                trace!(%category, attempt, ?rejection, "Candidate rejected");
            }
            outcome.accepted += batch.accepted.len();
            cases.extend(batch.accepted);
        }

        if outcome.accepted < required {
            warn!(
                %category,
                accepted = outcome.accepted,
                required,
                attempts = outcome.attempts,
                "Category quota not filled"
            );
        } else {
            debug!(%category, accepted = outcome.accepted, attempts = outcome.attempts, "Category quota filled");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.chunker, ChunkerConfig::default());
        assert_eq!(config.embed_concurrency, 4);
        assert_eq!(config.top_k, 8);
        assert_eq!(config.test_cases_per_document, 15);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_config_builders() {
        let config = OrchestratorConfig::default()
            .with_chunker(ChunkerConfig::new(40, 10))
            .with_test_cases_per_document(10)
            .with_max_attempts(0);
        assert_eq!(config.chunker.chunk_size, 40);
        assert_eq!(config.test_cases_per_document, 10);
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn test_report_shortfall() {
        let report = RunReport {
            extraction: ExtractionOutcome::default(),
            rules: 2,
            categories: vec![],
            produced: 12,
            required: 15,
        };
        let err = report.shortfall().unwrap();
        assert_eq!(err.to_string(), "quota shortfall: 12/15");
        assert_eq!(report.summary()["produced"], 12);

        let full = RunReport {
            produced: 15,
            ..report
        };
        assert!(full.shortfall().is_none());
    }
}
