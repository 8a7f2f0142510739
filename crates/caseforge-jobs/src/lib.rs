//! # caseforge-jobs
//!
//! Test case generation pipeline for caseforge.
//!
//! This crate provides:
//! - Text extraction for uploaded plain text and markdown
//! - The per-document orchestrator (extraction, validation, generation)
//! - Strict parsing and validation of model output into test cases
//! - Job tracking with exclusive writer leases and broadcast events
//! - In-memory and PostgreSQL repository bundles
//!
//! ## Example
//!
//! ```ignore
//! use caseforge_jobs::{Document, Pipeline, Stores};
//! use caseforge_inference::InferenceStack;
//!
//! let stack = InferenceStack::from_env()?;
//! let pipeline = Pipeline::builder(
//!     Stores::in_memory(stack.embedder.dimension()),
//!     stack.embedder.clone(),
//!     stack.generator.clone(),
//! )
//! .build()?;
//!
//! let job_id = pipeline
//!     .submit_document(Document::new("refunds.md", "Refunds are issued within 30 days."))
//!     .await?;
//! let status = pipeline.wait(job_id).await?;
//! println!("{:?}", status);
//! ```

pub mod assembler;
pub mod extraction;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod schema;
pub mod stores;
pub mod tracker;

// Re-export core types
pub use caseforge_core::*;
pub use caseforge_db::ChunkerConfig;

pub use assembler::{AssembledBatch, Rejection, TestCaseAssembler};
pub use extraction::{ExtractorRegistry, PlainTextExtractor};
pub use orchestrator::{
    CategoryOutcome, ChunkFailure, ExtractionOutcome, Orchestrator, OrchestratorConfig, RunReport,
};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use schema::{CandidateTestCase, ParseError, RuleCandidate};
pub use stores::{
    InMemoryDocumentRepository, InMemoryJobRepository, InMemoryTestCaseRepository, Stores,
};
pub use tracker::{JobTracker, JobWriter};
