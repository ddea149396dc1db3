//! Organization and membership endpoints.

use super::ListParams;
use crate::{
    api::{AppState, error::RpcStatus, principal::require_auth},
    domain::{
        State,
        organization::{
            self, AddMembersRequest, CreateOrganizationRequest, Organization,
            UpdateOrganizationRequest,
        },
        user::User,
    },
    rql::{Group, Page, Pagination, RqlQuery},
};
use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct OrganizationResponse {
    pub organization: Organization,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrganizationPageResponse {
    pub organizations: Vec<Organization>,
    pub pagination: Pagination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<Group>,
}

impl From<Page<Organization>> for OrganizationPageResponse {
    fn from(page: Page<Organization>) -> Self {
        Self {
            organizations: page.items,
            pagination: page.pagination,
            group: page.group,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MembersResponse {
    pub users: Vec<User>,
}

#[utoipa::path(
    post,
    path = "/v1beta1/organizations",
    request_body = CreateOrganizationRequest,
    responses(
        (status = 201, description = "Organization created; the caller becomes its owner.", body = OrganizationResponse),
        (status = 400, description = "Invalid name.", body = RpcStatus),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
        (status = 409, description = "Name already taken.", body = RpcStatus),
    ),
    tag = "organizations"
)]
pub async fn create_organization(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<CreateOrganizationRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match organization::create(state.store.as_ref(), &principal, payload).await {
        Ok(organization) => {
            (StatusCode::CREATED, Json(OrganizationResponse { organization })).into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/organizations",
    params(ListParams),
    responses(
        (status = 200, description = "Organizations visible to the caller.", body = OrganizationPageResponse),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
    ),
    tag = "organizations"
)]
pub async fn list_organizations(
    headers: HeaderMap,
    state: Extension<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match organization::list(state.store.as_ref(), &principal, &params.into_rql()).await {
        Ok(page) => (StatusCode::OK, Json(OrganizationPageResponse::from(page))).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/admin/organizations/search",
    request_body = RqlQuery,
    responses(
        (status = 200, description = "Matching organizations.", body = OrganizationPageResponse),
        (status = 400, description = "Invalid RQL query.", body = RpcStatus),
        (status = 403, description = "Superuser only.", body = RpcStatus),
    ),
    tag = "admin"
)]
pub async fn search_organizations(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(query): Json<RqlQuery>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match organization::search(state.store.as_ref(), &principal, &query).await {
        Ok(page) => (StatusCode::OK, Json(OrganizationPageResponse::from(page))).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/organizations/{id}",
    params(("id" = String, Path, description = "Organization id or name")),
    responses(
        (status = 200, description = "Organization detail.", body = OrganizationResponse),
        (status = 403, description = "Caller may not view the organization.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
    ),
    tag = "organizations"
)]
pub async fn get_organization(
    Path(id): Path<String>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match organization::get(state.store.as_ref(), &principal, &id).await {
        Ok(organization) => (StatusCode::OK, Json(OrganizationResponse { organization })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    patch,
    path = "/v1beta1/organizations/{id}",
    params(("id" = Uuid, Path, description = "Organization id")),
    request_body = UpdateOrganizationRequest,
    responses(
        (status = 200, description = "Organization updated.", body = OrganizationResponse),
        (status = 403, description = "Caller may not update the organization.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
        (status = 412, description = "Organization is disabled.", body = RpcStatus),
    ),
    tag = "organizations"
)]
pub async fn update_organization(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<UpdateOrganizationRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match organization::update(state.store.as_ref(), &principal, id, payload).await {
        Ok(organization) => (StatusCode::OK, Json(OrganizationResponse { organization })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1beta1/organizations/{id}",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 204, description = "Organization and everything beneath it deleted."),
        (status = 403, description = "Caller may not delete the organization.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
    ),
    tag = "organizations"
)]
pub async fn delete_organization(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match organization::delete(state.store.as_ref(), &principal, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/organizations/{id}/enable",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Organization enabled.", body = OrganizationResponse),
        (status = 403, description = "Caller may not change the state.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
    ),
    tag = "organizations"
)]
pub async fn enable_organization(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    set_state(id, &headers, &state, State::Enabled).await
}

#[utoipa::path(
    post,
    path = "/v1beta1/organizations/{id}/disable",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Organization disabled.", body = OrganizationResponse),
        (status = 403, description = "Caller may not change the state.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
    ),
    tag = "organizations"
)]
pub async fn disable_organization(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    set_state(id, &headers, &state, State::Disabled).await
}

async fn set_state(id: Uuid, headers: &HeaderMap, state: &AppState, target: State) -> Response {
    let principal = match require_auth(headers, state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match organization::set_state(state.store.as_ref(), &principal, id, target).await {
        Ok(organization) => (StatusCode::OK, Json(OrganizationResponse { organization })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/organizations/{id}/users",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Organization members.", body = MembersResponse),
        (status = 403, description = "Caller is not a member.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
    ),
    tag = "organizations"
)]
pub async fn list_members(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match organization::list_members(state.store.as_ref(), &principal, id).await {
        Ok(users) => (StatusCode::OK, Json(MembersResponse { users })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/organizations/{id}/users",
    params(("id" = Uuid, Path, description = "Organization id")),
    request_body = AddMembersRequest,
    responses(
        (status = 200, description = "Members added as viewers; existing members are left alone.", body = MembersResponse),
        (status = 403, description = "Caller may not manage members.", body = RpcStatus),
        (status = 404, description = "Organization or user not found.", body = RpcStatus),
        (status = 412, description = "Organization is disabled.", body = RpcStatus),
    ),
    tag = "organizations"
)]
pub async fn add_members(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<AddMembersRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let store = state.store.as_ref();
    if let Err(err) = organization::add_members(store, &principal, id, &payload.user_ids).await {
        return err.into_response();
    }
    match organization::list_members(store, &principal, id).await {
        Ok(users) => (StatusCode::OK, Json(MembersResponse { users })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1beta1/organizations/{id}/users/{user_id}",
    params(
        ("id" = Uuid, Path, description = "Organization id"),
        ("user_id" = Uuid, Path, description = "Member to remove"),
    ),
    responses(
        (status = 204, description = "Member removed."),
        (status = 403, description = "Caller may not manage members.", body = RpcStatus),
        (status = 404, description = "Organization or user not found.", body = RpcStatus),
        (status = 412, description = "The last owner cannot be removed.", body = RpcStatus),
    ),
    tag = "organizations"
)]
pub async fn remove_member(
    Path((id, user_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match organization::remove_member(state.store.as_ref(), &principal, id, user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

