//! Error types for caseforge.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using caseforge's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for caseforge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// The text extractor cannot decode the uploaded format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// External model call failed in a way that may succeed on retry
    /// (timeout, 5xx, rate limiting, connection reset)
    #[error("Transient service error: {0}")]
    TransientService(String),

    /// External model call failed in a way that will not succeed on retry
    /// (4xx, malformed response, dimension mismatch)
    #[error("Permanent service error: {0}")]
    PermanentService(String),

    /// Generation ended with fewer test cases than required
    #[error("quota shortfall: {produced}/{required}")]
    QuotaShortfall { produced: usize, required: usize },

    /// A non-terminal job of the same type already exists for the document
    #[error("Concurrency violation: {job_type} job already active for document {document_id}")]
    ConcurrencyViolation { document_id: Uuid, job_type: String },

    /// Model output did not match the expected schema
    #[error("Parse error: {0}")]
    Parse(String),

    /// The job was cancelled before completion
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failed operation may succeed if attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientService(_))
    }

    /// Classify an HTTP status from a model service.
    ///
    /// 408, 429 and 5xx are transient; every other non-success status is permanent.
    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body)
        };
        if status == 408 || status == 429 || (500..600).contains(&status) {
            Error::TransientService(msg)
        } else {
            Error::PermanentService(msg)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return Error::TransientService(e.to_string());
        }
        match e.status() {
            Some(status) => Error::from_status(status.as_u16(), ""),
            None if e.is_decode() => Error::PermanentService(e.to_string()),
            None => Error::TransientService(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_document_not_found() {
        let id = Uuid::nil();
        let err = Error::DocumentNotFound(id);
        assert_eq!(err.to_string(), format!("Document not found: {}", id));
    }

    #[test]
    fn test_error_display_job_not_found() {
        let id = Uuid::new_v4();
        let err = Error::JobNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_error_display_quota_shortfall() {
        let err = Error::QuotaShortfall {
            produced: 12,
            required: 15,
        };
        assert_eq!(err.to_string(), "quota shortfall: 12/15");
    }

    #[test]
    fn test_error_display_concurrency_violation() {
        let id = Uuid::nil();
        let err = Error::ConcurrencyViolation {
            document_id: id,
            job_type: "test_generation".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("test_generation"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_error_display_unsupported_format() {
        let err = Error::UnsupportedFormat("pdf".to_string());
        assert_eq!(err.to_string(), "Unsupported format: pdf");
    }

    #[test]
    fn test_error_display_service_errors() {
        let err = Error::TransientService("HTTP 503".to_string());
        assert_eq!(err.to_string(), "Transient service error: HTTP 503");
        let err = Error::PermanentService("HTTP 400".to_string());
        assert_eq!(err.to_string(), "Permanent service error: HTTP 400");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing API key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing API key");
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("overlap >= chunk_size".to_string());
        assert_eq!(err.to_string(), "Invalid input: overlap >= chunk_size");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_is_transient() {
        assert!(Error::TransientService("x".into()).is_transient());
        assert!(!Error::PermanentService("x".into()).is_transient());
        assert!(!Error::Parse("x".into()).is_transient());
        assert!(!Error::Internal("x".into()).is_transient());
    }

    #[test]
    fn test_from_status_classification() {
        assert!(Error::from_status(408, "").is_transient());
        assert!(Error::from_status(429, "slow down").is_transient());
        assert!(Error::from_status(500, "").is_transient());
        assert!(Error::from_status(503, "").is_transient());
        assert!(!Error::from_status(400, "bad").is_transient());
        assert!(!Error::from_status(401, "").is_transient());
        assert!(!Error::from_status(404, "").is_transient());
    }

    #[test]
    fn test_from_status_message_includes_body() {
        let err = Error::from_status(429, "rate limited");
        assert!(err.to_string().contains("HTTP 429: rate limited"));
        let err = Error::from_status(400, "");
        assert!(err.to_string().ends_with("HTTP 400"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
