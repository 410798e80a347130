//! Errors returned by the orchestration, fleet and registry collaborators.

use thiserror::Error;

/// Result type alias for collaborator calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Message the orchestration service returns when a cluster has no nodes
/// at all to place onto.
pub const NO_CONTAINER_INSTANCES_MSG: &str = "No Container Instances were found in your cluster";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error("{code}: {message}")]
    Api { code: String, message: String },

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    pub fn api(code: &str, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Whether placement failed only because the cluster lacks room.
    pub fn is_insufficient_capacity(&self) -> bool {
        match self {
            Self::InsufficientCapacity(_) => true,
            Self::Api { message, .. } => message.contains(NO_CONTAINER_INSTANCES_MSG),
            _ => false,
        }
    }

    /// Whether the error means an idempotent create or delete already
    /// happened. Only these exact codes qualify.
    pub fn is_idempotent_done(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::AlreadyExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_errors_are_recognised() {
        assert!(ProviderError::InsufficientCapacity("full".into()).is_insufficient_capacity());
        assert!(
            ProviderError::api("InvalidParameterException", NO_CONTAINER_INSTANCES_MSG)
                .is_insufficient_capacity()
        );
        assert!(!ProviderError::api("AccessDenied", "nope").is_insufficient_capacity());
        assert!(!ProviderError::NotFound("x".into()).is_insufficient_capacity());
    }

    #[test]
    fn only_exact_codes_are_idempotent() {
        assert!(ProviderError::NotFound("i-1".into()).is_idempotent_done());
        assert!(ProviderError::AlreadyExists("grp".into()).is_idempotent_done());
        assert!(!ProviderError::api("NotFoundish", "not found").is_idempotent_done());
        assert!(!ProviderError::Unavailable("throttled".into()).is_idempotent_done());
    }
}
