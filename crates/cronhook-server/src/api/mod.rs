mod jobs;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use cronhook_scheduler::{Scheduler, SchedulerError};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{request_id, require_bearer_auth, AuthState, RequestId};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    running_jobs: usize,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub(super) fn map_scheduler_error(request_id: &str, error: &SchedulerError) -> ApiError {
    match error {
        SchedulerError::Validation(message) => {
            ApiError::new(request_id, "validation_error", message.clone())
        }
        SchedulerError::DuplicateName { .. } => {
            ApiError::new(request_id, "conflict", error.to_string())
        }
        SchedulerError::NotFound { .. } => ApiError::new(request_id, "not_found", error.to_string()),
        _ => {
            tracing::error!(error = %error, "scheduler operation failed");
            ApiError::new(request_id, "internal_error", "scheduler operation failed")
        }
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

fn protected_router(auth: AuthState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route("/api/v1/jobs/search", get(jobs::search_jobs))
        .route("/api/v1/jobs/similar", get(jobs::most_similar_job))
        .route(
            "/api/v1/jobs/{name}",
            get(jobs::get_job)
                .put(jobs::edit_job)
                .delete(jobs::stop_job),
        )
        .layer(axum::middleware::from_fn_with_state(
            auth,
            require_bearer_auth,
        ))
}

pub fn build_app(state: AppState, auth: AuthState) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    Json(ApiResponse {
        data: HealthData {
            status: "ok",
            running_jobs: state.scheduler.list_running_jobs().len(),
        },
        meta: ResponseMeta::new(req_id.0),
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::{scheduler, send};
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    #[test]
    fn api_error_validation_error_maps_to_bad_request() {
        let response = ApiError::new("req-1", "validation_error", "invalid input").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn scheduler_errors_map_to_codes() {
        let conflict = map_scheduler_error(
            "req-1",
            &SchedulerError::DuplicateName {
                name: "ping".to_string(),
            },
        );
        assert_eq!(conflict.error.code, "conflict");

        let missing = map_scheduler_error(
            "req-1",
            &SchedulerError::NotFound {
                name: "ping".to_string(),
            },
        );
        assert_eq!(missing.error.code, "not_found");
        assert!(missing.error.message.contains("ping"));
    }

    #[tokio::test]
    async fn health_is_public_and_echoes_request_id() {
        let scheduler = scheduler().await;
        let (status, json) = send(
            &scheduler,
            AuthState::with_keys(vec!["k".to_string()]),
            Request::builder()
                .uri("/api/v1/health")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .expect("request"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "ok");
        assert_eq!(json["data"]["running_jobs"], 0);
        assert_eq!(json["meta"]["request_id"], "req-42");
    }

    #[tokio::test]
    async fn job_routes_require_a_bearer_token() {
        let scheduler = scheduler().await;
        let auth = AuthState::with_keys(vec!["k".to_string()]);

        let (status, json) = send(
            &scheduler,
            auth.clone(),
            Request::builder()
                .uri("/api/v1/jobs")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "unauthorized");

        let (status, _) = send(
            &scheduler,
            auth,
            Request::builder()
                .uri("/api/v1/jobs")
                .header("authorization", "Bearer k")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
