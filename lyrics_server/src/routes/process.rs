//! Song processing jobs: submit a URL, follow its progress.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::job::{JobStatus, ProcessingJob};
use crate::models::job_step::JobStep;
use crate::routes::auth::CurrentUser;
use crate::routes::AppState;
use crate::services::downloader::SourceKind;
use crate::services::job_service;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/process_url", post(process_url))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{job_id}", get(get_job))
}

#[derive(Debug, Deserialize)]
pub struct SongRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ProcessQuery {
    pub wait: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResult {
    pub job_id: i64,
    pub song_id: i64,
    pub split_id: i64,
}

#[derive(Debug, Serialize)]
pub struct QueuedJob {
    pub job_id: i64,
    pub status: String,
}

/// JSON response for a job with its steps.
#[derive(Debug, Serialize)]
pub struct JobJson {
    pub id: i64,
    pub source_url: String,
    pub source_kind: String,
    pub status: String,
    pub song_id: Option<i64>,
    pub split_id: Option<i64>,
    pub error: Option<String>,
    pub duration_ms: Option<i32>,
    pub create_date: Option<chrono::DateTime<chrono::Utc>>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<StepJson>>,
}

#[derive(Debug, Serialize)]
pub struct StepJson {
    pub name: String,
    pub sequence: i32,
    pub status: String,
    pub detail: Option<String>,
    pub duration_ms: Option<i32>,
}

impl JobJson {
    fn new(job: ProcessingJob, steps: Option<Vec<JobStep>>) -> Self {
        Self {
            id: job.id,
            source_url: job.source_url,
            source_kind: job.source_kind,
            status: job.status,
            song_id: job.song_id,
            split_id: job.split_id,
            error: job.error,
            duration_ms: job.duration_ms,
            create_date: job.create_date,
            started_at: job.started_at,
            finished_at: job.finished_at,
            steps: steps.map(|steps| {
                steps
                    .into_iter()
                    .map(|s| StepJson {
                        name: s.name,
                        sequence: s.sequence,
                        status: s.status,
                        detail: s.detail,
                        duration_ms: s.duration_ms,
                    })
                    .collect()
            }),
        }
    }
}

async fn process_url(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ProcessQuery>,
    Json(req): Json<SongRequest>,
) -> Result<Response, ApiError> {
    let url = req.url.trim();
    let kind = SourceKind::classify(url).ok_or_else(|| {
        ApiError::Unprocessable("Unsupported URL. Provide a YouTube or Spotify track link.".into())
    })?;
    if kind == SourceKind::Spotify && !state.config.spotify_enabled() {
        return Err(ApiError::ServiceUnavailable("Spotify links are not supported on this server.".into()));
    }

    let job = {
        let mut conn = state.pool.get().await?;
        job_service::create_job(&mut conn, user.id, url, kind).await?
    };
    tracing::info!(job_id = job.id, owner_id = user.id, source = kind.as_str(), "Job queued");

    if !query.wait.unwrap_or(true) {
        let body = QueuedJob {
            job_id: job.id,
            status: job.status,
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let timeout = Duration::from_secs(state.config.job_wait_timeout_secs);
    let finished = job_service::wait_for_job(&state.pool, job.id, timeout).await?;

    match finished {
        Some(job) if job.job_status() == Some(JobStatus::Succeeded) => {
            match (job.song_id, job.split_id) {
                (Some(song_id), Some(split_id)) => Ok(Json(ProcessResult {
                    job_id: job.id,
                    song_id,
                    split_id,
                })
                .into_response()),
                _ => Err(ApiError::Internal("Song processing failed.".into())),
            }
        }
        Some(job) if job.job_status().map(JobStatus::is_terminal) == Some(false) => {
            tracing::warn!(job_id = job.id, "Job still running after wait timeout");
            let body = QueuedJob {
                job_id: job.id,
                status: job.status,
            };
            Ok((StatusCode::ACCEPTED, Json(body)).into_response())
        }
        _ => Err(ApiError::Internal("Song processing failed.".into())),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}

async fn list_jobs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobJson>>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let mut conn = state.pool.get().await?;
    let jobs = job_service::list_jobs_for_owner(&mut conn, user.id, limit).await?;
    Ok(Json(jobs.into_iter().map(|j| JobJson::new(j, None)).collect()))
}

async fn get_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(job_id): Path<i64>,
) -> Result<Json<JobJson>, ApiError> {
    let mut conn = state.pool.get().await?;
    let job = job_service::get_job(&mut conn, job_id)
        .await?
        .filter(|j| j.owner_id == user.id)
        .ok_or_else(|| ApiError::NotFound("Job not found".into()))?;
    let steps = job_service::list_steps(&mut conn, job.id).await?;
    Ok(Json(JobJson::new(job, Some(steps))))
}
