//! Structured log fields emitted by a generation run.
//!
//! Captures JSON log lines from a pipeline run and checks them against the
//! shared field names in `caseforge_core::logging`.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use caseforge_core::logging as fields;
use caseforge_core::{Document, JobStatus};
use caseforge_inference::mock::{MockEmbeddingBackend, MockGenerationBackend};
use caseforge_inference::{EmbeddingAdapter, GenerationAdapter, RetryPolicy};
use caseforge_jobs::prompts::VALIDATION_SYSTEM_PROMPT;
use caseforge_jobs::{ChunkerConfig, OrchestratorConfig, Pipeline, Stores};

const DIM: usize = 16;

const POLICY: &str = "Refund policy. Customers may request a refund within 30 days of purchase. \
Refunds above 500 EUR require manager approval.";

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn lines(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

fn generator() -> MockGenerationBackend {
    MockGenerationBackend::from_fn(|system, prompt| {
        if system == VALIDATION_SYSTEM_PROMPT {
            return Ok(r#"{"rules":[{"rule":"Refunds within 30 days","sources":["C1"]}]}"#.into());
        }
        let rest = prompt.split("Write exactly ").nth(1).unwrap_or_default();
        let mut words = rest.split_whitespace();
        let count: usize = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
        let category = words.nth(1).unwrap_or("functional").to_string();
        let cases: Vec<Value> = (0..count)
            .map(|i| {
                json!({
                    "title": format!("{} check {}", category, i),
                    "steps": ["Submit the request"],
                    "expected_result": "Handled per policy",
                    "category": category
                })
            })
            .collect();
        Ok(json!({ "test_cases": cases }).to_string())
    })
}

fn find<'a>(lines: &'a [Value], message: &str) -> &'a Value {
    lines
        .iter()
        .find(|l| l["message"] == message)
        .unwrap_or_else(|| panic!("no log line {:?}", message))
}

#[tokio::test]
async fn test_generation_run_logs_shared_field_names() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(true)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let embedder = EmbeddingAdapter::new(Arc::new(MockEmbeddingBackend::new(DIM)))
        .with_retry_policy(RetryPolicy::no_retry());
    let generator =
        GenerationAdapter::new(Arc::new(generator())).with_retry_policy(RetryPolicy::no_retry());
    let pipeline = Pipeline::builder(Stores::in_memory(DIM), embedder, generator)
        .with_config(OrchestratorConfig::default().with_chunker(ChunkerConfig::new(80, 10)))
        .build()
        .unwrap();

    let document = Document::new("refunds.md", POLICY);
    let document_id = document.id.to_string();
    let job_id = pipeline.submit_document(document).await.unwrap();
    assert_eq!(
        pipeline.wait(job_id).await.unwrap().status,
        JobStatus::Completed
    );
    let job_id = job_id.to_string();

    let lines = captured.lines();

    let queued = find(&lines, "Job queued");
    assert_eq!(queued[fields::SUBSYSTEM], "jobs");
    assert_eq!(queued[fields::COMPONENT], "tracker");
    assert_eq!(queued[fields::JOB_ID], job_id.as_str());
    assert_eq!(queued[fields::DOCUMENT_ID], document_id.as_str());
    assert_eq!(queued[fields::JOB_TYPE], "test_generation");

    let extracted = find(&lines, "Extraction complete");
    assert!(extracted[fields::CHUNK_COUNT].as_u64().unwrap() > 0);

    let finished = find(&lines, "Generation run finished");
    assert!(finished[fields::DURATION_MS].is_u64());
    let run = finished["spans"]
        .as_array()
        .unwrap()
        .iter()
        .find(|span| span["name"] == "run")
        .unwrap();
    assert_eq!(run[fields::SUBSYSTEM], "jobs");
    assert_eq!(run[fields::COMPONENT], "orchestrator");
    assert_eq!(run[fields::OPERATION], "run");
    assert_eq!(run[fields::DOCUMENT_ID], document_id.as_str());
    assert_eq!(run[fields::JOB_ID], job_id.as_str());
}
