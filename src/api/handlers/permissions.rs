use crate::{
    api::{AppState, error::RpcStatus, principal::require_auth},
    domain::permission::{self, CreatePermissionsRequest, Permission},
};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct PermissionsResponse {
    pub permissions: Vec<Permission>,
}

#[utoipa::path(
    get,
    path = "/v1beta1/permissions",
    responses(
        (status = 200, description = "Registered permissions.", body = PermissionsResponse),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
    ),
    tag = "permissions"
)]
pub async fn list_permissions(headers: HeaderMap, state: Extension<AppState>) -> impl IntoResponse {
    if let Err(err) = require_auth(&headers, &state).await {
        return err.into_response();
    }

    match permission::list(state.store.as_ref()).await {
        Ok(permissions) => (StatusCode::OK, Json(PermissionsResponse { permissions })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/admin/permissions",
    request_body = CreatePermissionsRequest,
    responses(
        (status = 201, description = "Permissions registered; existing keys are updated in place.", body = PermissionsResponse),
        (status = 400, description = "Key is not `service.resource.verb`.", body = RpcStatus),
        (status = 403, description = "Superuser only.", body = RpcStatus),
    ),
    tag = "admin"
)]
pub async fn create_permissions(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<CreatePermissionsRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match permission::register(state.store.as_ref(), &principal, payload.bodies).await {
        Ok(permissions) => {
            (StatusCode::CREATED, Json(PermissionsResponse { permissions })).into_response()
        }
        Err(err) => err.into_response(),
    }
}
