//! Scheduler error types.

use capgrid_autoscale::ScaleError;
use capgrid_provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("scaling error: {0}")]
    Scale(#[from] ScaleError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
