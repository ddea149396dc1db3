//! User endpoints.
//!
//! Users are created by the caller for themselves (or by a superuser for
//! anyone), so `create_user` resolves the identity header without requiring
//! an existing row. Every other handler requires a stored, enabled caller.

use super::{ListParams, preferences::PreferencesResponse};
use crate::{
    api::{
        AppState,
        error::RpcStatus,
        principal::{identity, require_auth},
    },
    domain::{
        State,
        organization::Organization,
        preference::{self, Scope, SetPreferencesRequest},
        user::{self, CreateUserRequest, UpdateUserRequest, User},
    },
    rql::{Group, Page, Pagination, RqlQuery},
};
use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub user: User,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UsersResponse {
    pub users: Vec<User>,
    pub pagination: Pagination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<Group>,
}

impl From<Page<User>> for UsersResponse {
    fn from(page: Page<User>) -> Self {
        Self {
            users: page.items,
            pagination: page.pagination,
            group: page.group,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrganizationsResponse {
    pub organizations: Vec<Organization>,
}

#[utoipa::path(
    post,
    path = "/v1beta1/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created.", body = UserResponse),
        (status = 400, description = "Invalid email or name.", body = RpcStatus),
        (status = 401, description = "Missing identity header.", body = RpcStatus),
        (status = 403, description = "Creating someone else requires a superuser.", body = RpcStatus),
        (status = 409, description = "Email or name already taken.", body = RpcStatus),
    ),
    tag = "users"
)]
pub async fn create_user(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> impl IntoResponse {
    let identity = match identity(&headers, &state) {
        Ok(identity) => identity,
        Err(err) => return err.into_response(),
    };

    match user::create(state.store.as_ref(), &identity, payload).await {
        Ok(user) => (StatusCode::CREATED, Json(UserResponse { user })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/users",
    params(ListParams),
    responses(
        (status = 200, description = "Page of users.", body = UsersResponse),
        (status = 400, description = "Invalid query.", body = RpcStatus),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
    ),
    tag = "users"
)]
/// Lists users visible to the caller: everyone for superusers, otherwise the
/// members of the caller's organizations.
pub async fn list_users(
    headers: HeaderMap,
    state: Extension<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match user::list(state.store.as_ref(), &principal, &params.into_rql()).await {
        Ok(page) => (StatusCode::OK, Json(UsersResponse::from(page))).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/admin/users/search",
    request_body = RqlQuery,
    responses(
        (status = 200, description = "Matching users.", body = UsersResponse),
        (status = 400, description = "Invalid RQL query.", body = RpcStatus),
        (status = 403, description = "Superuser only.", body = RpcStatus),
    ),
    tag = "admin"
)]
pub async fn search_users(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(query): Json<RqlQuery>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match user::search(state.store.as_ref(), &principal, &query).await {
        Ok(page) => (StatusCode::OK, Json(UsersResponse::from(page))).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/users/self",
    responses(
        (status = 200, description = "The calling user.", body = UserResponse),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
    ),
    tag = "users"
)]
pub async fn current_user(headers: HeaderMap, state: Extension<AppState>) -> impl IntoResponse {
    match require_auth(&headers, &state).await {
        Ok(principal) => (StatusCode::OK, Json(UserResponse { user: principal.user })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/users/{id}",
    params(("id" = String, Path, description = "User id or name")),
    responses(
        (status = 200, description = "User detail.", body = UserResponse),
        (status = 404, description = "User not found.", body = RpcStatus),
    ),
    tag = "users"
)]
pub async fn get_user(
    Path(id): Path<String>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    if let Err(err) = require_auth(&headers, &state).await {
        return err.into_response();
    }

    match user::get(state.store.as_ref(), &id).await {
        Ok(user) => (StatusCode::OK, Json(UserResponse { user })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    patch,
    path = "/v1beta1/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated.", body = UserResponse),
        (status = 403, description = "Only the user or a superuser may update.", body = RpcStatus),
        (status = 404, description = "User not found.", body = RpcStatus),
    ),
    tag = "users"
)]
pub async fn update_user(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<UpdateUserRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match user::update(state.store.as_ref(), &principal, id, payload).await {
        Ok(user) => (StatusCode::OK, Json(UserResponse { user })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1beta1/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "User deleted."),
        (status = 403, description = "Superuser only.", body = RpcStatus),
        (status = 404, description = "User not found.", body = RpcStatus),
    ),
    tag = "users"
)]
pub async fn delete_user(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match user::delete(state.store.as_ref(), &principal, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/users/{id}/enable",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User enabled.", body = UserResponse),
        (status = 403, description = "Superuser only.", body = RpcStatus),
        (status = 404, description = "User not found.", body = RpcStatus),
    ),
    tag = "users"
)]
pub async fn enable_user(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    set_state(id, &headers, &state, State::Enabled).await
}

#[utoipa::path(
    post,
    path = "/v1beta1/users/{id}/disable",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User disabled.", body = UserResponse),
        (status = 403, description = "Superuser only.", body = RpcStatus),
        (status = 404, description = "User not found.", body = RpcStatus),
    ),
    tag = "users"
)]
pub async fn disable_user(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    set_state(id, &headers, &state, State::Disabled).await
}

async fn set_state(
    id: Uuid,
    headers: &HeaderMap,
    state: &AppState,
    target: State,
) -> axum::response::Response {
    let principal = match require_auth(headers, state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match user::set_state(state.store.as_ref(), &principal, id, target).await {
        Ok(user) => (StatusCode::OK, Json(UserResponse { user })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/users/self/organizations",
    responses(
        (status = 200, description = "Organizations the caller belongs to.", body = OrganizationsResponse),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
    ),
    tag = "users"
)]
pub async fn current_user_organizations(
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match user::organizations(state.store.as_ref(), &principal).await {
        Ok(organizations) => {
            (StatusCode::OK, Json(OrganizationsResponse { organizations })).into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/users/self/preferences",
    responses(
        (status = 200, description = "Caller preferences with trait defaults filled in.", body = PreferencesResponse),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
    ),
    tag = "preferences"
)]
pub async fn list_current_user_preferences(
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let scope = Scope::User(principal.id());
    match preference::list(state.store.as_ref(), &principal, scope).await {
        Ok(preferences) => (StatusCode::OK, Json(PreferencesResponse { preferences })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/users/self/preferences",
    request_body = SetPreferencesRequest,
    responses(
        (status = 201, description = "Preferences stored.", body = PreferencesResponse),
        (status = 400, description = "Unknown trait or invalid value.", body = RpcStatus),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
    ),
    tag = "preferences"
)]
pub async fn set_current_user_preferences(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<SetPreferencesRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let scope = Scope::User(principal.id());
    match preference::set(state.store.as_ref(), &principal, scope, payload.bodies).await {
        Ok(preferences) => {
            (StatusCode::CREATED, Json(PreferencesResponse { preferences })).into_response()
        }
        Err(err) => err.into_response(),
    }
}
