//! HTTP handlers for caseforge-api.

pub mod documents;
pub mod health;
pub mod jobs;

pub use documents::{create_document, list_test_cases, upload_document};
pub use health::health_check;
pub use jobs::{cancel_job, get_job};
