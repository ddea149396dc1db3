use crate::{rql::RqlError, store::StoreError};
use thiserror::Error;

/// Failures surfaced by the service layer.
///
/// Each variant maps to one HTTP status and gRPC code in `api::error`.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("permission denied")]
    PermissionDenied,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    FailedPrecondition(String),
    #[error(transparent)]
    Store(StoreError),
}

impl ServiceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition(message.into())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::Rql(err) => Self::InvalidArgument(err.to_string()),
            err @ StoreError::Database(_) => Self::Store(err),
        }
    }
}

impl From<RqlError> for ServiceError {
    fn from(err: RqlError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_keep_their_message() {
        let err = ServiceError::from(StoreError::Conflict("organization already exists".into()));
        assert_eq!(err.to_string(), "organization already exists");
    }

    #[test]
    fn rql_errors_become_invalid_arguments() {
        let err = ServiceError::from(RqlError::UnsupportedFilter("secret".into()));
        assert!(matches!(err, ServiceError::InvalidArgument(message) if message == "secret is not supported in filters"));
    }
}
