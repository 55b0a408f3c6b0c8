use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use chrono::Utc;
use serde_json::json;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tracing::{info, warn};

use crate::{
    auth::catalog_token,
    catalog::parse_external_id,
    error::MigrateError,
    models::{
        CreateJobRequest, Job, JobAcceptedResponse, ManualOverrideRequest,
        ManualOverrideResponse, TransferReport, TransferRequest,
    },
    youtube::YoutubeClient,
    AppState,
};

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "timestamp": Utc::now() }))
}

pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = &state.pipeline;
    Json(json!({
        "maxPlaylistSize": pipeline.jobs.max_tracks(),
        "rateLimitDelayMs": pipeline.settings.search_delay.as_millis() as u64,
        "transferDelayMs": pipeline.settings.transfer_delay.as_millis() as u64,
        "searchCache": pipeline.cache.stats().await,
        "progressSubscribers": pipeline.progress.active_sessions().await,
    }))
}

pub async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, MigrateError> {
    let token = catalog_token(&headers)?;

    if payload.tracks.is_empty() {
        return Err(MigrateError::InvalidRequest("No tracks provided".to_string()));
    }
    if payload.session_id.trim().is_empty() {
        return Err(MigrateError::InvalidRequest("Session ID required".to_string()));
    }

    let pipeline = &state.pipeline;
    let job = pipeline
        .jobs
        .create(&payload.session_id, payload.playlist, payload.tracks)
        .await?;

    let searcher = Arc::new(YoutubeClient::new(&state.config.youtube_api_base, token));
    pipeline.start_analysis(&job.id, searcher).await?;

    Ok((StatusCode::ACCEPTED, Json(accepted(&job))))
}

/// Re-runs matching on an existing job, e.g. after a crash lost trailing
/// matches or after a failed run.
pub async fn reanalyze_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, MigrateError> {
    let token = catalog_token(&headers)?;
    let searcher = Arc::new(YoutubeClient::new(&state.config.youtube_api_base, token));
    let job = state.pipeline.start_analysis(&job_id, searcher).await?;
    info!(job_id = %job_id, "Re-analysis requested");
    Ok((StatusCode::ACCEPTED, Json(accepted(&job))))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, MigrateError> {
    state
        .pipeline
        .jobs
        .get(&job_id)
        .await
        .map(Json)
        .ok_or(MigrateError::JobNotFound(job_id))
}

pub async fn list_session_jobs(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Vec<Job>> {
    Json(state.pipeline.jobs.list_for_session(&session_id).await)
}

pub async fn set_manual_override(
    State(state): State<AppState>,
    Path((job_id, track_index)): Path<(String, usize)>,
    Json(payload): Json<ManualOverrideRequest>,
) -> Result<Json<ManualOverrideResponse>, MigrateError> {
    if payload.video_id.trim().is_empty() {
        return Err(MigrateError::InvalidRequest("Video ID required".to_string()));
    }

    let video_id = parse_external_id(&payload.video_id);
    if !state
        .pipeline
        .jobs
        .set_manual_override(&job_id, track_index, &video_id)
        .await
    {
        return Err(MigrateError::TrackNotFound {
            job_id,
            index: track_index,
        });
    }

    Ok(Json(ManualOverrideResponse {
        success: true,
        video_id,
    }))
}

pub async fn start_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Json(payload): Json<TransferRequest>,
) -> Result<Json<TransferReport>, MigrateError> {
    let token = catalog_token(&headers)?;
    let writer = Arc::new(YoutubeClient::new(&state.config.youtube_api_base, token));
    let report = state
        .pipeline
        .transfer(&job_id, &payload.session_id, writer)
        .await?;
    Ok(Json(report))
}

pub async fn progress_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.pipeline.progress.subscribe(&session_id).await;
    info!(session_id = %session_id, "Progress stream connected");

    let stream = ReceiverStream::new(rx).filter_map(|event| {
        match Event::default().json_data(&event) {
            Ok(sse) => Some(Ok::<_, Infallible>(sse)),
            Err(err) => {
                warn!(kind = event.kind(), "Failed to encode progress event: {err}");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn accepted(job: &Job) -> JobAcceptedResponse {
    JobAcceptedResponse {
        job_id: job.id.clone(),
        status: job.status,
        track_count: job.tracks.len(),
        created_at: job.created_at,
    }
}
