//! Autoscaling error types.

use capgrid_placement::ResourceError;
use capgrid_provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("task definition {task_definition} does not fit on a new node in {environment}")]
    IncompatibleDemand {
        environment: String,
        task_definition: String,
    },

    #[error("right sizer has not started a cycle yet")]
    NeverRan,

    #[error("right sizer last ran {elapsed_secs}s ago (limit {limit_secs}s)")]
    Stale { elapsed_secs: u64, limit_secs: u64 },
}

pub type ScaleResult<T> = Result<T, ScaleError>;
