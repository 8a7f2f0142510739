use axum::extract::State;
use axum::Json;
use serde_json::Value;
use tracing::warn;

use crate::{ApiError, AppState};

/// Liveness plus a health check of the inference backend.
#[utoipa::path(get, path = "/health", tag = "System",
    responses(
        (status = 200, description = "Service healthy"),
        (status = 503, description = "Inference backend unreachable"),
    ))]
pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let inference = match state.backend.health_check().await {
        Ok(ok) => ok,
        Err(e) => {
            warn!(error = %e, "Inference health check failed");
            false
        }
    };
    if !inference {
        return Err(ApiError::ServiceUnavailable(
            "inference backend unreachable".to_string(),
        ));
    }
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "inference": inference,
    })))
}
