//! Resource manager error types.

use capgrid_core::WaitError;
use capgrid_provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("unknown instance type: {0}")]
    UnknownInstanceType(String),

    #[error("auto scaling group {0} has no launch configuration")]
    MissingLaunchConfiguration(String),

    #[error("could not describe any container instance in {environment}: {reasons}")]
    DescribeFailed { environment: String, reasons: String },

    #[error(transparent)]
    Wait(#[from] WaitError),
}

pub type ResourceResult<T> = Result<T, ResourceError>;
