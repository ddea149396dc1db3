//! Policy endpoints: bind a role to a principal on a resource.

use crate::{
    api::{AppState, error::RpcStatus, principal::require_auth},
    domain::policy::{self, CreatePolicyRequest, ListPoliciesQuery, Policy},
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
pub struct PolicyResponse {
    pub policy: Policy,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PoliciesResponse {
    pub policies: Vec<Policy>,
}

#[utoipa::path(
    post,
    path = "/v1beta1/policies",
    request_body = CreatePolicyRequest,
    responses(
        (status = 201, description = "Policy created.", body = PolicyResponse),
        (status = 400, description = "Malformed resource or principal.", body = RpcStatus),
        (status = 403, description = "Caller may not administer the resource.", body = RpcStatus),
        (status = 404, description = "Role or resource not found.", body = RpcStatus),
        (status = 409, description = "An identical policy exists.", body = RpcStatus),
    ),
    tag = "policies"
)]
pub async fn create_policy(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<CreatePolicyRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match policy::create(state.store.as_ref(), &principal, payload).await {
        Ok(policy) => (StatusCode::CREATED, Json(PolicyResponse { policy })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/policies",
    params(ListPoliciesQuery),
    responses(
        (status = 200, description = "Policies matching every given filter.", body = PoliciesResponse),
        (status = 400, description = "Exactly one of org_id, project_id or group_id is required.", body = RpcStatus),
        (status = 403, description = "Caller may not view the policies.", body = RpcStatus),
    ),
    tag = "policies"
)]
pub async fn list_policies(
    headers: HeaderMap,
    state: Extension<AppState>,
    Query(query): Query<ListPoliciesQuery>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match policy::list(state.store.as_ref(), &principal, &query).await {
        Ok(policies) => (StatusCode::OK, Json(PoliciesResponse { policies })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1beta1/policies/{id}",
    params(("id" = Uuid, Path, description = "Policy id")),
    responses(
        (status = 204, description = "Policy deleted."),
        (status = 403, description = "Caller may not administer the resource.", body = RpcStatus),
        (status = 404, description = "Policy not found.", body = RpcStatus),
    ),
    tag = "policies"
)]
pub async fn delete_policy(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match policy::delete(state.store.as_ref(), &principal, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
