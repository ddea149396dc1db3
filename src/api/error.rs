//! `RpcStatus`-shaped error bodies.

use crate::domain::ServiceError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

/// Error payload: a gRPC status code plus a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RpcStatus {
    pub code: i32,
    pub message: String,
}

/// HTTP status and gRPC code for a service error.
#[must_use]
pub const fn status_codes(err: &ServiceError) -> (StatusCode, i32) {
    match err {
        ServiceError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, 3),
        ServiceError::Unauthenticated => (StatusCode::UNAUTHORIZED, 16),
        ServiceError::PermissionDenied => (StatusCode::FORBIDDEN, 7),
        ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, 5),
        ServiceError::Conflict(_) => (StatusCode::CONFLICT, 6),
        ServiceError::FailedPrecondition(_) => (StatusCode::PRECONDITION_FAILED, 9),
        ServiceError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, 13),
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, code) = status_codes(&self);
        let message = if let Self::Store(err) = &self {
            error!("store failure: {err}");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(RpcStatus { code, message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn every_error_maps_to_its_status() {
        let cases = [
            (ServiceError::invalid("bad"), StatusCode::BAD_REQUEST, 3),
            (ServiceError::Unauthenticated, StatusCode::UNAUTHORIZED, 16),
            (ServiceError::PermissionDenied, StatusCode::FORBIDDEN, 7),
            (ServiceError::NotFound("user"), StatusCode::NOT_FOUND, 5),
            (ServiceError::conflict("taken"), StatusCode::CONFLICT, 6),
            (ServiceError::precondition("disabled"), StatusCode::PRECONDITION_FAILED, 9),
            (
                ServiceError::Store(StoreError::Database(sqlx::Error::PoolTimedOut)),
                StatusCode::INTERNAL_SERVER_ERROR,
                13,
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(status_codes(&err), (status, code));
        }
    }

    #[test]
    fn database_errors_are_not_leaked() {
        let response =
            ServiceError::Store(StoreError::Database(sqlx::Error::PoolTimedOut)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
