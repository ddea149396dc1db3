//! Permission checks for the calling user.

use crate::{
    api::{AppState, error::RpcStatus, principal::require_auth},
    authz::{self, CheckPair, Resource, keys::format_permissions},
    domain::ServiceError,
};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckRequest {
    pub permission: String,
    /// `namespace:id`; takes precedence over `object_namespace`/`object_id`.
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub object_namespace: String,
    #[serde(default)]
    pub object_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckResponse {
    pub status: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchCheckBody {
    pub permission: String,
    pub resource: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchCheckRequest {
    pub bodies: Vec<BatchCheckBody>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchCheckResponse {
    pub pairs: Vec<CheckPair>,
    /// `permission::resource` to outcome, for clients that look results up by key.
    pub permissions: BTreeMap<String, bool>,
}

fn resolve_resource(request: &CheckRequest) -> Result<Resource, ServiceError> {
    if let Ok(resource) = Resource::parse(&request.resource) {
        return Ok(resource);
    }
    let namespace = request.object_namespace.trim();
    let id = request.object_id.trim();
    if namespace.is_empty() || id.is_empty() {
        return Err(ServiceError::invalid(
            "resource or object_namespace and object_id are required",
        ));
    }
    Ok(Resource::new(namespace, id))
}

#[utoipa::path(
    post,
    path = "/v1beta1/check",
    request_body = CheckRequest,
    responses(
        (status = 200, description = "Whether the caller holds the permission.", body = CheckResponse),
        (status = 400, description = "Malformed resource.", body = RpcStatus),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
    ),
    tag = "authz"
)]
pub async fn check(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<CheckRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let resource = match resolve_resource(&payload) {
        Ok(resource) => resource,
        Err(err) => return err.into_response(),
    };

    match authz::check(state.store.as_ref(), &principal, &payload.permission, &resource).await {
        Ok(status) => (StatusCode::OK, Json(CheckResponse { status })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/batchcheck",
    request_body = BatchCheckRequest,
    responses(
        (status = 200, description = "One outcome per body, in request order.", body = BatchCheckResponse),
        (status = 400, description = "A body has a malformed resource.", body = RpcStatus),
        (status = 401, description = "Unknown caller.", body = RpcStatus),
    ),
    tag = "authz"
)]
pub async fn batch_check(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<BatchCheckRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let mut checks = Vec::with_capacity(payload.bodies.len());
    for body in payload.bodies {
        match Resource::parse(&body.resource) {
            Ok(resource) => checks.push((body.permission, resource)),
            Err(err) => return ServiceError::invalid(err.to_string()).into_response(),
        }
    }

    let mut pairs = Vec::with_capacity(checks.len());
    for (permission, resource) in checks {
        match authz::check(state.store.as_ref(), &principal, &permission, &resource).await {
            Ok(status) => pairs.push(CheckPair {
                permission,
                resource: resource.to_string(),
                status,
            }),
            Err(err) => return err.into_response(),
        }
    }

    let permissions = format_permissions(&pairs);
    (StatusCode::OK, Json(BatchCheckResponse { pairs, permissions })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(resource: &str, namespace: &str, id: &str) -> CheckRequest {
        CheckRequest {
            permission: "get".to_string(),
            resource: resource.to_string(),
            object_namespace: namespace.to_string(),
            object_id: id.to_string(),
        }
    }

    #[test]
    fn resource_string_wins_over_object_fields() {
        let resource = resolve_resource(&request("project:p1", "org", "o1")).unwrap();
        assert_eq!(resource.to_string(), "app/project:p1");
    }

    #[test]
    fn falls_back_to_object_fields() {
        let resource = resolve_resource(&request("", "org", "o1")).unwrap();
        assert_eq!(resource.to_string(), "app/organization:o1");
    }

    #[test]
    fn rejects_missing_resource() {
        assert!(matches!(
            resolve_resource(&request("", "", "o1")),
            Err(ServiceError::InvalidArgument(_))
        ));
    }
}
