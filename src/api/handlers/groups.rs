//! Group endpoints, all scoped to the organization in the path.

use crate::{
    api::{AppState, error::RpcStatus, principal::require_auth},
    domain::{
        group::{self, CreateGroupRequest, Group},
        organization::AddMembersRequest,
    },
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
pub struct GroupResponse {
    pub group: Group,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupsResponse {
    pub groups: Vec<Group>,
}

#[utoipa::path(
    post,
    path = "/v1beta1/organizations/{id}/groups",
    params(("id" = Uuid, Path, description = "Organization id")),
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created; the caller becomes its owner.", body = GroupResponse),
        (status = 400, description = "Invalid name.", body = RpcStatus),
        (status = 403, description = "Caller may not create groups here.", body = RpcStatus),
        (status = 409, description = "Name already taken in the organization.", body = RpcStatus),
    ),
    tag = "groups"
)]
pub async fn create_group(
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<CreateGroupRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match group::create(state.store.as_ref(), &principal, org_id, payload).await {
        Ok(group) => (StatusCode::CREATED, Json(GroupResponse { group })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/organizations/{id}/groups",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Groups of the organization.", body = GroupsResponse),
        (status = 403, description = "Caller is not a member.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
    ),
    tag = "groups"
)]
pub async fn list_groups(
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match group::list(state.store.as_ref(), &principal, org_id).await {
        Ok(groups) => (StatusCode::OK, Json(GroupsResponse { groups })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/organizations/{id}/groups/{group_id}",
    params(
        ("id" = Uuid, Path, description = "Organization id"),
        ("group_id" = Uuid, Path, description = "Group id"),
    ),
    responses(
        (status = 200, description = "Group detail.", body = GroupResponse),
        (status = 404, description = "Group not found in this organization.", body = RpcStatus),
    ),
    tag = "groups"
)]
pub async fn get_group(
    Path((org_id, id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match group::get(state.store.as_ref(), &principal, org_id, id).await {
        Ok(group) => (StatusCode::OK, Json(GroupResponse { group })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1beta1/organizations/{id}/groups/{group_id}",
    params(
        ("id" = Uuid, Path, description = "Organization id"),
        ("group_id" = Uuid, Path, description = "Group id"),
    ),
    responses(
        (status = 204, description = "Group deleted."),
        (status = 403, description = "Caller may not delete the group.", body = RpcStatus),
        (status = 404, description = "Group not found in this organization.", body = RpcStatus),
    ),
    tag = "groups"
)]
pub async fn delete_group(
    Path((org_id, id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match group::delete(state.store.as_ref(), &principal, org_id, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/organizations/{id}/groups/{group_id}/users",
    params(
        ("id" = Uuid, Path, description = "Organization id"),
        ("group_id" = Uuid, Path, description = "Group id"),
    ),
    request_body = AddMembersRequest,
    responses(
        (status = 204, description = "Members added."),
        (status = 403, description = "Caller may not manage the group.", body = RpcStatus),
        (status = 404, description = "Group or user not found.", body = RpcStatus),
    ),
    tag = "groups"
)]
pub async fn add_group_members(
    Path((org_id, id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<AddMembersRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match group::add_members(state.store.as_ref(), &principal, org_id, id, &payload.user_ids).await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1beta1/organizations/{id}/groups/{group_id}/users/{user_id}",
    params(
        ("id" = Uuid, Path, description = "Organization id"),
        ("group_id" = Uuid, Path, description = "Group id"),
        ("user_id" = Uuid, Path, description = "Member to remove"),
    ),
    responses(
        (status = 204, description = "Member removed."),
        (status = 403, description = "Caller may not manage the group.", body = RpcStatus),
        (status = 404, description = "Group or member not found.", body = RpcStatus),
    ),
    tag = "groups"
)]
pub async fn remove_group_member(
    Path((org_id, id, user_id)): Path<(Uuid, Uuid, Uuid)>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match group::remove_member(state.store.as_ref(), &principal, org_id, id, user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

