//! caseforge-api - HTTP API server for caseforge
//!
//! Routes:
//! - `GET  /health`
//! - `POST /api/v1/documents`
//! - `POST /api/v1/documents/upload`
//! - `GET  /api/v1/documents/:id/test-cases`
//! - `GET  /api/v1/jobs/:id`
//! - `POST /api/v1/jobs/:id/cancel`
//! - `GET  /openapi.json`

pub mod error;
pub mod handlers;
pub mod logging;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use uuid::Uuid;

use caseforge_core::{defaults, InferenceBackend};
use caseforge_jobs::Pipeline;

pub use error::ApiError;

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// STATE AND CONFIG
// =============================================================================

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    /// Checked by `/health`.
    pub backend: Arc<dyn InferenceBackend>,
}

/// Listener and middleware settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<HeaderValue>,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: defaults::SERVER_PORT,
            allowed_origins: vec![HeaderValue::from_static("http://localhost:3000")],
            max_body_bytes: defaults::MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Load from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | `3000` |
    /// | `ALLOWED_ORIGINS` | `http://localhost:3000` (comma separated) |
    /// | `MAX_BODY_BYTES` | 10 MiB |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(base.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.port),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| parse_allowed_origins(&v))
                .filter(|origins| !origins.is_empty())
                .unwrap_or(base.allowed_origins),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.max_body_bytes),
        }
    }
}

/// Parse a comma-separated origin list, skipping invalid entries.
pub fn parse_allowed_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

// =============================================================================
// OPENAPI
// =============================================================================

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Caseforge API",
        description = "Generates categorized test cases from business documents"
    ),
    paths(
        handlers::health::health_check,
        handlers::documents::create_document,
        handlers::documents::upload_document,
        handlers::documents::list_test_cases,
        handlers::jobs::get_job,
        handlers::jobs::cancel_job,
    ),
    components(schemas(
        handlers::documents::CreateDocumentRequest,
        handlers::documents::SubmittedJob,
        handlers::documents::TestCaseListResponse,
        handlers::jobs::CancelJobResponse,
        caseforge_core::JobStatusReport,
        caseforge_core::JobStatus,
        caseforge_core::JobType,
        caseforge_core::TestCase,
        caseforge_core::TestCategory,
        caseforge_core::Priority,
        caseforge_core::Severity,
        caseforge_core::TestCaseSource,
        caseforge_core::ExecutionStatus,
    )),
    tags(
        (name = "Documents", description = "Document submission and generated test cases"),
        (name = "Jobs", description = "Background job status and control"),
        (name = "System", description = "Health"),
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

// =============================================================================
// ROUTER
// =============================================================================

/// Build the application router with its middleware stack.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/openapi.json", get(openapi_json))
        .route("/api/v1/documents", post(handlers::create_document))
        .route("/api/v1/documents/upload", post(handlers::upload_document))
        .route(
            "/api/v1/documents/:id/test-cases",
            get(handlers::list_test_cases),
        )
        .route("/api/v1/jobs/:id", get(handlers::get_job))
        .route("/api/v1/jobs/:id/cancel", post(handlers::cancel_job))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(config.allowed_origins.clone()))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
                .max_age(Duration::from_secs(3600)),
        )
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allowed_origins_skips_blanks() {
        let origins = parse_allowed_origins("https://qa.example.com, ,http://localhost:5173");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "https://qa.example.com");
        assert_eq!(origins[1], "http://localhost:5173");
    }

    #[test]
    fn test_openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/documents",
            "/api/v1/documents/upload",
            "/api/v1/documents/{id}/test-cases",
            "/api/v1/jobs/{id}",
            "/api/v1/jobs/{id}/cancel",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
