//! Platform and organization role endpoints.

use crate::{
    api::{AppState, error::RpcStatus, principal::require_auth},
    domain::role::{self, CreateRoleRequest, Role},
};
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleResponse {
    pub role: Role,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RolesResponse {
    pub roles: Vec<Role>,
}

#[utoipa::path(
    get,
    path = "/v1beta1/roles",
    responses(
        (status = 200, description = "Platform-wide roles.", body = RolesResponse),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
    ),
    tag = "roles"
)]
pub async fn list_platform_roles(headers: HeaderMap, state: Extension<AppState>) -> impl IntoResponse {
    if let Err(err) = require_auth(&headers, &state).await {
        return err.into_response();
    }

    match role::list_platform(state.store.as_ref()).await {
        Ok(roles) => (StatusCode::OK, Json(RolesResponse { roles })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Platform role created or updated.", body = RoleResponse),
        (status = 400, description = "Unknown permission or bad name.", body = RpcStatus),
        (status = 403, description = "Superuser only.", body = RpcStatus),
    ),
    tag = "roles"
)]
pub async fn create_platform_role(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<CreateRoleRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match role::create_platform(state.store.as_ref(), &principal, payload).await {
        Ok(role) => (StatusCode::CREATED, Json(RoleResponse { role })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/organizations/{id}/roles",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Roles defined by the organization.", body = RolesResponse),
        (status = 403, description = "Caller is not a member.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
    ),
    tag = "roles"
)]
pub async fn list_organization_roles(
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match role::list_for_org(state.store.as_ref(), &principal, org_id).await {
        Ok(roles) => (StatusCode::OK, Json(RolesResponse { roles })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/organizations/{id}/roles",
    params(("id" = Uuid, Path, description = "Organization id")),
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Organization role created or updated.", body = RoleResponse),
        (status = 400, description = "Unknown permission or bad name.", body = RpcStatus),
        (status = 403, description = "Caller may not manage roles here.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
    ),
    tag = "roles"
)]
pub async fn create_organization_role(
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<CreateRoleRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match role::create_for_org(state.store.as_ref(), &principal, org_id, payload).await {
        Ok(role) => (StatusCode::CREATED, Json(RoleResponse { role })).into_response(),
        Err(err) => err.into_response(),
    }
}
