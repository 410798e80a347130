//! Admin API handlers.
//!
//! Every handler answers with the same JSON envelope:
//! `{"success": bool, "data": ..., "error": "..."}`.

use std::error::Error as StdError;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use capgrid_provider::{ContainerOverride, ProviderError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// 404 when a collaborator said the thing does not exist, 500 otherwise.
fn status_for(err: &(dyn StdError + 'static)) -> StatusCode {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(ProviderError::NotFound(_)) = e.downcast_ref::<ProviderError>() {
            return StatusCode::NOT_FOUND;
        }
        current = e.source();
    }
    StatusCode::INTERNAL_SERVER_ERROR
}

// ── Health ─────────────────────────────────────────────────────

/// GET /health
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    match state.right_sizer.health() {
        Ok(heartbeat) => ApiResponse::ok(heartbeat).into_response(),
        Err(e) => {
            warn!(error = %e, "right sizer unhealthy");
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
    }
}

// ── Scheduled tasks ────────────────────────────────────────────

/// GET /api/v1/tasks
pub async fn list_tasks(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.scheduler.list_tasks().await)
}

/// GET /api/v1/tasks/{id}
pub async fn get_task(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let copies = state.scheduler.get_task(&id).await;
    if copies.is_empty() {
        return error_response("no scheduled copies for task", StatusCode::NOT_FOUND).into_response();
    }
    ApiResponse::ok(copies).into_response()
}

/// DELETE /api/v1/tasks/{id}
pub async fn delete_task(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.scheduler.delete_task(&id).await {
        0 => error_response("no scheduled copies for task", StatusCode::NOT_FOUND).into_response(),
        cancelled => ApiResponse::ok(serde_json::json!({
            "task_id": id,
            "cancelled": cancelled,
        }))
        .into_response(),
    }
}

/// Launch request body.
#[derive(Debug, Deserialize)]
pub struct LaunchRequest {
    pub task_id: String,
    pub task_definition: String,
    #[serde(default = "default_copies")]
    pub count: u32,
    #[serde(default)]
    pub overrides: Vec<ContainerOverride>,
}

fn default_copies() -> u32 {
    1
}

/// POST /api/v1/environments/{id}/tasks
pub async fn launch_task(
    State(state): State<ApiState>,
    Path(environment_id): Path<String>,
    Json(req): Json<LaunchRequest>,
) -> impl IntoResponse {
    if req.count == 0 {
        return error_response("count must be at least 1", StatusCode::BAD_REQUEST).into_response();
    }

    let result = state
        .launcher
        .launch(&environment_id, &req.task_id, &req.task_definition, req.count, req.overrides)
        .await;

    match result {
        Ok(tasks) => (StatusCode::CREATED, ApiResponse::ok(tasks)).into_response(),
        Err(e) => error_response(&e.to_string(), status_for(&e)).into_response(),
    }
}

// ── Scaling ────────────────────────────────────────────────────

/// POST /api/v1/environments/{id}/scale
pub async fn run_environment_scaler(
    State(state): State<ApiState>,
    Path(environment_id): Path<String>,
) -> impl IntoResponse {
    match state.environment_scaler.run(&environment_id).await {
        Ok(info) => ApiResponse::ok(info).into_response(),
        Err(e) => error_response(&e.to_string(), status_for(&e)).into_response(),
    }
}

/// POST /api/v1/right-sizer/run
pub async fn run_right_sizer(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.right_sizer.run_cycle().await)
}
