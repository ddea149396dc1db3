//! Project endpoints. Creation and listing are nested under the owning
//! organization; everything else addresses the project by id.

use crate::{
    api::{AppState, error::RpcStatus, principal::require_auth},
    domain::project::{self, CreateProjectRequest, Project, UpdateProjectRequest},
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
pub struct ProjectResponse {
    pub project: Project,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProjectsResponse {
    pub projects: Vec<Project>,
}

#[utoipa::path(
    post,
    path = "/v1beta1/organizations/{id}/projects",
    params(("id" = Uuid, Path, description = "Organization id")),
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created.", body = ProjectResponse),
        (status = 400, description = "Invalid name.", body = RpcStatus),
        (status = 403, description = "Caller may not create projects here.", body = RpcStatus),
        (status = 409, description = "Name already taken in the organization.", body = RpcStatus),
        (status = 412, description = "Organization is disabled.", body = RpcStatus),
    ),
    tag = "projects"
)]
pub async fn create_project(
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(mut payload): Json<CreateProjectRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    payload.org_id = org_id;
    match project::create(state.store.as_ref(), &principal, payload).await {
        Ok(project) => (StatusCode::CREATED, Json(ProjectResponse { project })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/organizations/{id}/projects",
    params(("id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Projects of the organization.", body = ProjectsResponse),
        (status = 403, description = "Caller is not a member.", body = RpcStatus),
        (status = 404, description = "Organization not found.", body = RpcStatus),
    ),
    tag = "projects"
)]
pub async fn list_projects(
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match project::list(state.store.as_ref(), &principal, org_id).await {
        Ok(projects) => (StatusCode::OK, Json(ProjectsResponse { projects })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/projects/{id}",
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project detail.", body = ProjectResponse),
        (status = 403, description = "Caller may not view the project.", body = RpcStatus),
        (status = 404, description = "Project not found.", body = RpcStatus),
    ),
    tag = "projects"
)]
pub async fn get_project(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match project::get(state.store.as_ref(), &principal, id).await {
        Ok(project) => (StatusCode::OK, Json(ProjectResponse { project })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    patch,
    path = "/v1beta1/projects/{id}",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = UpdateProjectRequest,
    responses(
        (status = 200, description = "Project updated.", body = ProjectResponse),
        (status = 403, description = "Caller may not update the project.", body = RpcStatus),
        (status = 404, description = "Project not found.", body = RpcStatus),
    ),
    tag = "projects"
)]
pub async fn update_project(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<UpdateProjectRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match project::update(state.store.as_ref(), &principal, id, payload).await {
        Ok(project) => (StatusCode::OK, Json(ProjectResponse { project })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1beta1/projects/{id}",
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 204, description = "Project deleted."),
        (status = 403, description = "Caller may not delete the project.", body = RpcStatus),
        (status = 404, description = "Project not found.", body = RpcStatus),
    ),
    tag = "projects"
)]
pub async fn delete_project(
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match project::delete(state.store.as_ref(), &principal, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
