//! # Metrics API Handlers

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};

use crate::engine::{ScheduleWindow, SyncMetrics};
use crate::error::{ApiError, validation_error};
use crate::server::AppState;

/// Aggregate statistics, recomputed from the job store on every call
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Current metrics", body = SyncMetrics),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "metrics"
)]
pub async fn get_metrics(State(state): State<AppState>) -> Result<Json<SyncMetrics>, ApiError> {
    Ok(Json(state.engine.get_metrics().await?))
}

/// Record the external scheduler's last and next sync times
#[utoipa::path(
    put,
    path = "/metrics/schedule",
    request_body = ScheduleWindow,
    responses(
        (status = 204, description = "Schedule window stored"),
        (status = 400, description = "Invalid window", body = ApiError)
    ),
    tag = "metrics"
)]
pub async fn put_schedule(
    State(state): State<AppState>,
    body: Result<Json<ScheduleWindow>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(window) = body?;

    if let (Some(last), Some(next)) = (window.last_sync_time, window.next_scheduled_sync)
        && next < last
    {
        return Err(validation_error(
            "Invalid schedule window",
            serde_json::json!({
                "next_scheduled_sync": "Must not be earlier than last_sync_time"
            }),
        ));
    }

    state.engine.set_schedule_window(window).await;
    Ok(StatusCode::NO_CONTENT)
}
