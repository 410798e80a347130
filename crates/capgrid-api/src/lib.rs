//! capgrid-api — admin REST API for the capgrid control plane.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/health` | Right-sizer liveness (200 / 503) |
//! | GET | `/api/v1/tasks` | All scheduled placeholders |
//! | GET | `/api/v1/tasks/{id}` | Placeholders for one workload |
//! | DELETE | `/api/v1/tasks/{id}` | Cancel every copy of a workload |
//! | POST | `/api/v1/environments/{id}/tasks` | Launch a one-off workload |
//! | POST | `/api/v1/environments/{id}/scale` | Run the environment scaler |
//! | POST | `/api/v1/right-sizer/run` | Run one right-sizing sweep now |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use capgrid_autoscale::{EnvironmentScaler, RightSizer};
use capgrid_scheduler::{TaskLauncher, TaskScheduler};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: TaskScheduler,
    pub launcher: TaskLauncher,
    pub environment_scaler: EnvironmentScaler,
    pub right_sizer: Arc<RightSizer>,
}

/// Build the complete admin router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/tasks", get(handlers::list_tasks))
        .route("/tasks/{id}", get(handlers::get_task).delete(handlers::delete_task))
        .route("/environments/{id}/tasks", post(handlers::launch_task))
        .route("/environments/{id}/scale", post(handlers::run_environment_scaler))
        .route("/right-sizer/run", post(handlers::run_right_sizer))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health).with_state(state))
}
