//! Preference endpoints for the platform and organization scopes. The user
//! scope lives with the other `users/self` routes.

use crate::{
    api::{AppState, error::RpcStatus, principal::require_auth},
    domain::preference::{self, Preference, Scope, SetPreferencesRequest, Trait},
};
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct PreferencesResponse {
    pub preferences: Vec<Preference>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TraitsResponse {
    pub traits: Vec<Trait>,
}

#[utoipa::path(
    get,
    path = "/v1beta1/preferences/traits",
    responses(
        (status = 200, description = "Every preference the platform understands.", body = TraitsResponse),
    ),
    tag = "preferences"
)]
pub async fn list_traits() -> impl IntoResponse {
    Json(TraitsResponse {
        traits: preference::traits().to_vec(),
    })
}

async fn list_scope(headers: &HeaderMap, state: &AppState, scope: Scope) -> Response {
    let principal = match require_auth(headers, state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match preference::list(state.store.as_ref(), &principal, scope).await {
        Ok(preferences) => (StatusCode::OK, Json(PreferencesResponse { preferences })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn set_scope(
    headers: &HeaderMap,
    state: &AppState,
    scope: Scope,
    payload: SetPreferencesRequest,
) -> Response {
    let principal = match require_auth(headers, state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match preference::set(state.store.as_ref(), &principal, scope, payload.bodies).await {
        Ok(preferences) => {
            (StatusCode::CREATED, Json(PreferencesResponse { preferences })).into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/preferences",
    responses(
        (status = 200, description = "Platform preferences with trait defaults filled in.", body = PreferencesResponse),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
    ),
    tag = "preferences"
)]
pub async fn list_platform_preferences(
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    list_scope(&headers, &state, Scope::Platform).await
}

#[utoipa::path(
    post,
    path = "/v1beta1/preferences",
    request_body = SetPreferencesRequest,
    responses(
        (status = 201, description = "Platform preferences stored.", body = PreferencesResponse),
        (status = 400, description = "Unknown trait or invalid value.", body = RpcStatus),
        (status = 403, description = "Superuser only.", body = RpcStatus),
    ),
    tag = "preferences"
)]
pub async fn set_platform_preferences(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<SetPreferencesRequest>,
) -> impl IntoResponse {
    set_scope(&headers, &state, Scope::Platform, payload).await
}

#[utoipa::path(
    get,
    path = "/v1beta1/organizations/{id}/preferences",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Organization preferences with trait defaults filled in.", body = PreferencesResponse),
        (status = 403, description = "Caller is not a member.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
    ),
    tag = "preferences"
)]
pub async fn list_organization_preferences(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    list_scope(&headers, &state, Scope::Organization(id)).await
}

#[utoipa::path(
    post,
    path = "/v1beta1/organizations/{id}/preferences",
    params(("id" = Uuid, Path, description = "Organization id")),
    request_body = SetPreferencesRequest,
    responses(
        (status = 201, description = "Organization preferences stored.", body = PreferencesResponse),
        (status = 400, description = "Unknown trait or invalid value.", body = RpcStatus),
        (status = 403, description = "Caller may not update the organization.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
    ),
    tag = "preferences"
)]
pub async fn set_organization_preferences(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<SetPreferencesRequest>,
) -> impl IntoResponse {
    set_scope(&headers, &state, Scope::Organization(id), payload).await
}
