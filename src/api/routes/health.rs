//! Health check endpoint

use axum::{Json, extract::State};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::HealthResponse,
};

/// GET /api/v1/health
///
/// 503 when the storage backend reports a problem
pub async fn health_check(State(state): State<ApiState>) -> ApiResult<Json<HealthResponse>> {
    let storage = state.pipeline.backend().health_check().await?;

    if !storage.healthy {
        return Err(ApiError::Unavailable(storage.message));
    }

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        storage,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}
