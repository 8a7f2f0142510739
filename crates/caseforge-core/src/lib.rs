//! # caseforge-core
//!
//! Core types, traits, and abstractions for caseforge.
//!
//! This crate provides the data model (documents, chunks, jobs, test cases),
//! the error type, and the trait seams (stores, model backends, extractors)
//! that the other caseforge crates depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, Phase, PipelineEvent};
pub use models::*;
pub use traits::*;
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
