//! Job control-plane handlers: list, create, search, get, edit, stop.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use cronhook_core::{JobDescriptor, JobEdit, SearchCriteria};
use cronhook_scheduler::{JobKind, JobView};
use serde::Deserialize;

use crate::middleware::RequestId;

use super::{map_scheduler_error, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct SimilarQuery {
    pub name: String,
    pub kind: Option<JobKind>,
}

/// GET /api/v1/jobs — running jobs in creation order.
pub(super) async fn list_jobs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<Vec<JobView>>> {
    Json(ApiResponse {
        data: state.scheduler.list_running_jobs(),
        meta: ResponseMeta::new(req_id.0),
    })
}

/// POST /api/v1/jobs — create and start a job.
pub(super) async fn create_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<JobDescriptor>,
) -> Result<(StatusCode, Json<ApiResponse<JobView>>), ApiError> {
    let view = state
        .scheduler
        .create_job(&body)
        .await
        .map_err(|e| map_scheduler_error(&req_id.0, &e))?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: view,
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

/// GET /api/v1/jobs/search — fuzzy search over running jobs.
pub(super) async fn search_jobs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(criteria): Query<SearchCriteria>,
) -> Json<ApiResponse<Vec<JobView>>> {
    Json(ApiResponse {
        data: state.scheduler.find_similar_jobs(&criteria),
        meta: ResponseMeta::new(req_id.0),
    })
}

/// GET /api/v1/jobs/similar?name=…&kind=… — the closest running job by name.
pub(super) async fn most_similar_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<SimilarQuery>,
) -> Result<Json<ApiResponse<JobView>>, ApiError> {
    let view = state
        .scheduler
        .find_most_similar(&query.name, query.kind)
        .ok_or_else(|| ApiError::new(&req_id.0, "not_found", "no running jobs"))?;

    Ok(Json(ApiResponse {
        data: view,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// GET /api/v1/jobs/:name
pub(super) async fn get_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<JobView>>, ApiError> {
    let view = state
        .scheduler
        .get_job_by_name(&name)
        .map_err(|e| map_scheduler_error(&req_id.0, &e))?;

    Ok(Json(ApiResponse {
        data: view,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// PUT /api/v1/jobs/:name — partial update; omitted fields are kept.
pub(super) async fn edit_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(name): Path<String>,
    Json(body): Json<JobEdit>,
) -> Result<Json<ApiResponse<JobView>>, ApiError> {
    let view = state
        .scheduler
        .edit_job(&name, &body)
        .await
        .map_err(|e| map_scheduler_error(&req_id.0, &e))?;

    Ok(Json(ApiResponse {
        data: view,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// DELETE /api/v1/jobs/:name — stop a job and free its name.
pub(super) async fn stop_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .scheduler
        .stop_job(&name)
        .await
        .map_err(|e| map_scheduler_error(&req_id.0, &e))?;

    Ok(StatusCode::NO_CONTENT)
}
