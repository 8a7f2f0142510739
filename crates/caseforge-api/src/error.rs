//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::error;

use caseforge_core::Error;

/// Error returned by handlers, rendered as `{"error": message}`.
#[derive(Debug)]
pub enum ApiError {
    Internal(String),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    UnsupportedMediaType(String),
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let msg = err.to_string();
        match err {
            Error::ConcurrencyViolation { .. } => ApiError::Conflict(msg),
            Error::NotFound(_) | Error::DocumentNotFound(_) | Error::JobNotFound(_) => {
                ApiError::NotFound(msg)
            }
            Error::UnsupportedFormat(_) => ApiError::UnsupportedMediaType(msg),
            Error::InvalidInput(_) => ApiError::BadRequest(msg),
            _ => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match self {
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                msg
            }
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::UnsupportedMediaType(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_core_error_status_mapping() {
        let id = Uuid::nil();
        let cases = [
            (
                Error::ConcurrencyViolation {
                    document_id: id,
                    job_type: "test_generation".into(),
                },
                StatusCode::CONFLICT,
            ),
            (Error::DocumentNotFound(id), StatusCode::NOT_FOUND),
            (Error::JobNotFound(id), StatusCode::NOT_FOUND),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                Error::UnsupportedFormat("pdf".into()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (Error::InvalidInput("empty".into()), StatusCode::BAD_REQUEST),
            (
                Error::TransientService("timeout".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                Error::QuotaShortfall {
                    produced: 12,
                    required: 15,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_message_preserved() {
        match ApiError::from(Error::UnsupportedFormat("pdf".into())) {
            ApiError::UnsupportedMediaType(msg) => assert_eq!(msg, "Unsupported format: pdf"),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }
}
