//! REST API endpoints for frertester
//!
//! All endpoints are under /api/v1/ and return JSON.

use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use frertester_core::pipeline::PipelineError;
use frertester_core::recovery::{RecoveryError, StreamConfig};
use frertester_core::report::{ExportError, Report, StreamReport};
use frertester_core::StreamId;
use serde::Serialize;

type ApiError = (StatusCode, String);

/// Application status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub build_date: String,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub streams: Vec<StreamId>,
    pub frames_observed: u64,
    /// Connected WebSocket clients
    pub subscribers: usize,
}

fn pipeline_error(err: PipelineError) -> ApiError {
    match err {
        PipelineError::Closed => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        PipelineError::Recovery(RecoveryError::UnknownStream { .. }) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        PipelineError::Recovery(RecoveryError::StreamExists { .. }) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        PipelineError::Recovery(RecoveryError::InvalidWindow { .. }) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
    }
}

fn export_error(err: ExportError) -> ApiError {
    match err {
        ExportError::Pipeline(err) => pipeline_error(err),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

async fn current_report(state: &AppState) -> Result<Report, ApiError> {
    state
        .exporter
        .snapshot(&state.pipeline)
        .await
        .map_err(export_error)
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let report = current_report(&state).await?;
    let uptime = (report.generated_at - report.started_at).num_seconds();

    Ok(Json(StatusResponse {
        version: frertester_core::VERSION.to_string(),
        build_date: frertester_core::BUILD_DATE.to_string(),
        started_at: report.started_at,
        uptime_seconds: uptime.max(0),
        streams: report.streams.iter().map(|s| s.stream_id).collect(),
        frames_observed: report.totals.frames_observed,
        subscribers: state.ws_tx.receiver_count(),
    }))
}

/// GET /api/v1/report
pub async fn get_report(State(state): State<AppState>) -> Result<Json<Report>, ApiError> {
    current_report(&state).await.map(Json)
}

/// GET /api/v1/streams
pub async fn list_streams(
    State(state): State<AppState>,
) -> Result<Json<Vec<StreamConfig>>, ApiError> {
    state
        .pipeline
        .streams()
        .await
        .map(Json)
        .map_err(pipeline_error)
}

/// GET /api/v1/streams/{id}
pub async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<StreamId>,
) -> Result<Json<StreamReport>, ApiError> {
    let report = current_report(&state).await?;
    report
        .streams
        .into_iter()
        .find(|s| s.stream_id == id)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("stream {id} not found")))
}

/// POST /api/v1/streams
pub async fn create_stream(
    State(state): State<AppState>,
    Json(config): Json<StreamConfig>,
) -> Result<(StatusCode, Json<StreamConfig>), ApiError> {
    state
        .pipeline
        .register_stream(config.clone())
        .await
        .map_err(pipeline_error)?;
    tracing::info!(stream_id = config.stream_id, "stream_registered_via_api");
    Ok((StatusCode::CREATED, Json(config)))
}

/// DELETE /api/v1/streams/{id}
pub async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<StreamId>,
) -> Result<StatusCode, ApiError> {
    state
        .pipeline
        .teardown_stream(id)
        .await
        .map_err(pipeline_error)?;
    tracing::info!(stream_id = id, "stream_torn_down_via_api");
    Ok(StatusCode::NO_CONTENT)
}
