//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use jobs_api::{
    CancelResponse, HealthResponse, JobStatusResponse, LogLine, LogsResponse, SubmitJobRequest,
    SubmitJobResponse, VersionResponse,
};
use serde::{Deserialize, Serialize};

use crate::models::job::JobRequest;
use crate::server::errors::ApiError;
use crate::server::state::ServerState;
use crate::storage::settings::{Settings, SettingsUpdate, VersionedSettings};
use crate::store::CancelOutcome;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "jarsmith".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Submit a job; returns as soon as it is queued
pub async fn submit_job_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = JobRequest::try_from(body)?;
    let job = state.orchestrator.submit(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id: job.id,
            state: job.state.as_str().to_string(),
            created_at: job.created_at,
        }),
    ))
}

/// Job status handler
pub async fn job_status_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.orchestrator.status(&job_id).await?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// Log query
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    /// Only lines with a greater sequence number
    #[serde(default)]
    pub since: u64,
}

/// Incremental log handler
pub async fn job_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    // Read the state first so a terminal flag never hides lines appended
    // between the two reads
    let job = state.orchestrator.status(&job_id).await?;
    let lines = state.orchestrator.logs(&job_id, query.since).await?;

    let next_since = lines.last().map(|l| l.seq).unwrap_or(query.since);
    Ok(Json(LogsResponse {
        job_id,
        lines: lines.iter().map(LogLine::from).collect(),
        next_since,
        terminal: job.state.is_terminal(),
    }))
}

/// Cancellation handler
pub async fn cancel_job_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let (outcome, job) = state.orchestrator.cancel(&job_id).await?;

    let message = match outcome {
        CancelOutcome::Cancelled => "Job cancelled before it started",
        CancelOutcome::Pending => "Job will stop at the next stage checkpoint",
        CancelOutcome::Ignored => "Deployment in progress, cancellation has no effect",
        CancelOutcome::Finished => "Job already finished",
    };

    Ok(Json(CancelResponse {
        job_id: job.id,
        outcome: outcome.as_str().to_string(),
        state: job.state.as_str().to_string(),
        message: message.to_string(),
    }))
}

/// Current settings handler
pub async fn get_settings_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<VersionedSettings> {
    Json(state.settings.snapshot().await)
}

/// Settings update; `version` must match the current record
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateSettingsRequest {
    pub version: u64,
    pub settings: Settings,
}

/// Settings update handler. The response lists changed fields that only
/// take effect after a restart under `restart_required`.
pub async fn put_settings_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsUpdate>, ApiError> {
    let updated = state.settings.update(body.version, body.settings).await?;
    Ok(Json(updated))
}
