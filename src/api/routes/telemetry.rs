//! HTTP bridge for telemetry messages

use axum::{Json, extract::State, http::StatusCode};
use tracing::trace;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{TelemetryAccepted, TelemetryRequest},
};

/// POST /api/v1/telemetry
///
/// Queues the message and answers 202 right away. Validation happens in the
/// pipeline: malformed messages are dropped there and show up in the drop
/// counters of `/api/v1/stats`.
pub async fn ingest_telemetry(
    State(state): State<ApiState>,
    Json(request): Json<TelemetryRequest>,
) -> ApiResult<(StatusCode, Json<TelemetryAccepted>)> {
    trace!("received telemetry for {}", request.topic);

    state
        .pipeline
        .publish(request.topic.clone(), request.payload_bytes())
        .await
        .map_err(|e| ApiError::Unavailable(format!("{e:#}")))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TelemetryAccepted {
            accepted: true,
            topic: request.topic,
        }),
    ))
}
