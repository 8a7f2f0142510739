//! Centralized default constants for caseforge.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration structs fall back to these when the matching environment
//! variable is absent.

// =============================================================================
// CHUNKING
// =============================================================================

/// Characters per chunk window.
pub const CHUNK_SIZE: usize = 1000;

/// Characters shared between adjacent chunk windows.
pub const CHUNK_OVERLAP: usize = 200;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name (Ollama).
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Default embedding model name (OpenAI-compatible).
pub const OPENAI_EMBED_MODEL: &str = "text-embedding-3-small";

/// Default embedding vector dimension (text-embedding-3-small).
pub const EMBED_DIMENSION: usize = 1536;

/// Texts per embedding request.
pub const EMBED_BATCH_SIZE: usize = 16;

/// Embedding requests in flight per document during extraction.
pub const EMBED_CONCURRENCY: usize = 4;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default OpenAI-compatible base URL.
pub const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default generation model (Ollama).
pub const GEN_MODEL: &str = "llama3.1:8b";

/// Default generation model (OpenAI-compatible).
pub const OPENAI_GEN_MODEL: &str = "gpt-4o-mini";

/// Per-call timeout for embedding requests.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

/// Per-call timeout for generation requests.
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Sampling temperature for test case generation.
pub const GEN_TEMPERATURE: f32 = 0.7;

/// Operations slower than this are logged at WARN with `slow = true`.
pub const SLOW_OPERATION_MS: u128 = 10_000;

// =============================================================================
// RETRY
// =============================================================================

/// Total attempts (first call included) for a transient model failure.
pub const RETRY_MAX_ATTEMPTS: u32 = 4;

/// Delay before the first retry.
pub const RETRY_INITIAL_DELAY_MS: u64 = 250;

/// Upper bound on any single retry delay.
pub const RETRY_MAX_DELAY_MS: u64 = 8_000;

/// Multiplier applied to the delay after each attempt.
pub const RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Jitter applied to each delay, as a percentage of the delay.
pub const RETRY_JITTER_PERCENT: u32 = 20;

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Chunks retrieved per query.
pub const RETRIEVAL_TOP_K: usize = 8;

/// Fixed query used to ground business rule extraction.
pub const BUSINESS_RULES_QUERY: &str =
    "business rules, requirements, constraints, obligations and policies the system must enforce";

// =============================================================================
// GENERATION
// =============================================================================

/// Test cases produced per document.
pub const TEST_CASES_PER_DOCUMENT: usize = 15;

/// Attempts per category (and for rule extraction) before giving up.
pub const GENERATION_MAX_ATTEMPTS: u32 = 3;

/// Confidence assigned when the model omits one.
pub const CONFIDENCE_SCORE: f32 = 0.8;

/// Maximum candidates requested in one generation call.
pub const GENERATION_BATCH_MAX: usize = 8;

// =============================================================================
// JOB PROGRESS
// =============================================================================

/// Progress reported when extraction starts.
pub const PROGRESS_EXTRACTION_START: i32 = 5;

/// Progress reported when extraction finishes.
pub const PROGRESS_EXTRACTION_END: i32 = 40;

/// Progress reported once business rules are validated.
pub const PROGRESS_VALIDATION: i32 = 50;

/// Progress reported when generation starts.
pub const PROGRESS_GENERATION_START: i32 = 60;

/// Progress reported when generation finishes.
pub const PROGRESS_GENERATION_END: i32 = 95;

/// Event bus buffer capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// DATABASE
// =============================================================================

/// Maximum pool connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Minimum pool connections.
pub const DB_MIN_CONNECTIONS: u32 = 1;

/// Seconds to wait for a pooled connection.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Maximum accepted request body in bytes.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
