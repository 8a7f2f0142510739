//! Document submission and test case retrieval handlers.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use caseforge_core::{Document, TestCase};

use crate::{ApiError, AppState};

/// Body of `POST /api/v1/documents`.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateDocumentRequest {
    /// Caller-chosen id; a new UUIDv7 is assigned when omitted.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    /// Extracted document text.
    pub content: String,
}

/// A started test generation job.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SubmittedJob {
    pub job_id: Uuid,
    pub document_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TestCaseListResponse {
    pub document_id: Uuid,
    pub total: usize,
    pub test_cases: Vec<TestCase>,
}

/// Submit extracted text and start generating test cases for it.
///
/// # Returns
/// - 202 Accepted with the job and document ids
/// - 400 Bad Request if the name or content is blank
/// - 409 Conflict while a generation job for the document is still running
#[utoipa::path(post, path = "/api/v1/documents", tag = "Documents",
    request_body = CreateDocumentRequest,
    responses(
        (status = 202, description = "Generation job started", body = SubmittedJob),
        (status = 400, description = "Invalid document"),
        (status = 409, description = "Generation already running for this document"),
    ))]
pub async fn create_document(
    State(state): State<AppState>,
    Json(body): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<SubmittedJob>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Document name is required".into()));
    }
    if body.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Document content is empty".into()));
    }

    let document = match body.id {
        Some(id) => Document::with_id(id, body.name, body.content),
        None => Document::new(body.name, body.content),
    };
    let document_id = document.id;
    let job_id = state.pipeline.submit_document(document).await?;
    info!(%document_id, %job_id, "Document submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmittedJob {
            job_id,
            document_id,
        }),
    ))
}

/// Upload a document file and start generating test cases for it.
///
/// # Multipart Fields
/// - `file`: document bytes (required)
/// - `name`: display name (optional, defaults to the file name)
/// - `format`: `txt`, `text`, `md` or `markdown` (optional, defaults to the file extension)
/// - `document_id`: caller-chosen UUID (optional)
///
/// # Returns
/// - 202 Accepted with the generation job and document ids
/// - 400 Bad Request if the file is missing or the format cannot be determined
/// - 415 Unsupported Media Type if the format cannot be decoded
#[utoipa::path(post, path = "/api/v1/documents/upload", tag = "Documents",
    responses(
        (status = 202, description = "Generation job started", body = SubmittedJob),
        (status = 400, description = "Malformed upload"),
        (status = 415, description = "Unsupported document format"),
    ))]
pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmittedJob>), ApiError> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut name: Option<String> = None;
    let mut format: Option<String> = None;
    let mut document_id: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let field_name = field.name().map(|n| n.to_string());
        match field_name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(|f| f.to_string());
                file_data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?
                        .to_vec(),
                );
            }
            Some("name") => name = Some(read_text(field).await?),
            Some("format") => format = Some(read_text(field).await?),
            Some("document_id") => {
                let raw = read_text(field).await?;
                document_id = Some(
                    raw.parse()
                        .map_err(|_| ApiError::BadRequest(format!("Invalid document_id: {}", raw)))?,
                );
            }
            _ => {}
        }
    }

    let bytes =
        file_data.ok_or_else(|| ApiError::BadRequest("Missing file in multipart form".into()))?;
    let format = format
        .filter(|f| !f.is_empty())
        .or_else(|| file_name.as_deref().and_then(extension))
        .ok_or_else(|| {
            ApiError::BadRequest("Document format missing: pass `format` or a file extension".into())
        })?;
    let name = name
        .filter(|n| !n.is_empty())
        .or(file_name)
        .unwrap_or_else(|| "upload".to_string());
    let document_id = document_id.unwrap_or_else(caseforge_core::new_v7);

    let job_id = state
        .pipeline
        .submit_upload(document_id, &name, &bytes, &format)
        .await?;
    info!(%document_id, %job_id, %format, byte_size = bytes.len(), "Document uploaded");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmittedJob {
            job_id,
            document_id,
        }),
    ))
}

/// Test cases of a document in category then creation order.
///
/// After a quota shortfall this is the partial set.
#[utoipa::path(get, path = "/api/v1/documents/{id}/test-cases", tag = "Documents",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Test cases", body = TestCaseListResponse),
        (status = 404, description = "Document not found"),
    ))]
pub async fn list_test_cases(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TestCaseListResponse>, ApiError> {
    let test_cases = state.pipeline.get_test_cases(id).await?;
    Ok(Json(TestCaseListResponse {
        document_id: id,
        total: test_cases.len(),
        test_cases,
    }))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map(|t| t.trim().to_string())
        .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))
}

/// Lowercased file extension, if any.
fn extension(file_name: &str) -> Option<String> {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
