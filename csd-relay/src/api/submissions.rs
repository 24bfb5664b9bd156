//! Submission dashboard queries and retry triggers (JSON)

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::submissions;
use crate::error::{ApiError, ApiResult};
use crate::models::{SubmissionEvent, SubmissionRecord, SubmissionStats, SubmissionStatus};
use crate::services::RetryPassSummary;
use crate::AppState;

/// Default page size for listings
pub const DEFAULT_LIMIT: i64 = 100;

/// Largest page size a caller may request
pub const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionListResponse {
    pub count: usize,
    pub submissions: Vec<SubmissionRecord>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionDetailResponse {
    pub submission: SubmissionRecord,
    pub history: Vec<SubmissionEvent>,
}

fn clamp_limit(limit: Option<i64>) -> ApiResult<i64> {
    match limit {
        None => Ok(DEFAULT_LIMIT),
        Some(n) if n < 1 => Err(ApiError::BadRequest(format!("limit must be at least 1, got {}", n))),
        Some(n) => Ok(n.min(MAX_LIMIT)),
    }
}

/// GET /api/submissions?status=&limit=
pub async fn list_submissions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<SubmissionListResponse>> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<SubmissionStatus>())
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let limit = clamp_limit(query.limit)?;

    let records = submissions::list_all(&state.db, status, limit).await?;
    Ok(Json(SubmissionListResponse {
        count: records.len(),
        submissions: records,
    }))
}

/// GET /api/submissions/failed
pub async fn list_failed(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<SubmissionListResponse>> {
    let limit = clamp_limit(query.limit)?;
    let records = submissions::list_failed(&state.db, limit).await?;
    Ok(Json(SubmissionListResponse {
        count: records.len(),
        submissions: records,
    }))
}

/// GET /api/submissions/:id
pub async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<SubmissionDetailResponse>> {
    let submission = submissions::get_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission {}", id)))?;
    let history = submissions::history(&state.db, id).await?;

    Ok(Json(SubmissionDetailResponse { submission, history }))
}

/// POST /api/submissions/:id/retry
pub async fn retry_submission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<SubmissionRecord>> {
    let record = state.pipeline.manual_retry(id).await?;
    Ok(Json(record))
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<SubmissionStats>> {
    Ok(Json(submissions::stats(&state.db).await?))
}

/// POST /api/retry-pass
pub async fn run_retry_pass(State(state): State<AppState>) -> ApiResult<Json<RetryPassSummary>> {
    let summary = state
        .orchestrator
        .run_retry_pass(state.retry_policy.max_attempts)
        .await?;
    Ok(Json(summary))
}

pub fn submission_routes() -> Router<AppState> {
    Router::new()
        .route("/api/submissions", get(list_submissions))
        .route("/api/submissions/failed", get(list_failed))
        .route("/api/submissions/:id", get(get_submission))
        .route("/api/submissions/:id/retry", post(retry_submission))
        .route("/api/stats", get(get_stats))
        .route("/api/retry-pass", post(run_retry_pass))
}
