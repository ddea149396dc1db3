//! Projects live inside an organization and inherit its owner's access.

use super::{
    Metadata, ServiceError, State, audit, non_empty,
    organization,
    slug::{SLUG_MAX, SLUG_MIN, normalize_slug},
};
use crate::{
    authz::{
        self, Principal, Resource,
        schema::{
            DELETE_PERMISSION, GET_PERMISSION, PROJECT_CREATE_PERMISSION, PROJECT_LIST_PERMISSION,
            PROJECT_NAMESPACE, UPDATE_PERMISSION,
        },
    },
    store::{Store, StoreError},
};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub org_id: Uuid,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub state: State,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    #[must_use]
    pub fn resource(&self) -> Resource {
        Resource::new(PROJECT_NAMESPACE, self.id.to_string())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    /// Set from the path by the HTTP layer.
    #[serde(skip)]
    pub org_id: Uuid,
    pub name: Option<String>,
    #[serde(default)]
    pub title: String,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

#[cfg(test)]
impl CreateProjectRequest {
    pub(crate) fn named(org_id: Uuid, name: &str) -> Self {
        Self {
            org_id,
            name: Some(name.to_string()),
            title: name.to_string(),
            metadata: None,
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

async fn authorized(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    permission: &str,
) -> Result<Project, ServiceError> {
    let project = store
        .fetch_project(id)
        .await?
        .ok_or(ServiceError::NotFound("project"))?;
    authz::require(store, principal, permission, &project.resource()).await?;
    Ok(project)
}

/// Creates a project. Requires `projectcreate` on the organization.
///
/// # Errors
/// `InvalidArgument` for a bad name, `Conflict` when the name is taken in the
/// organization, `PermissionDenied` without `projectcreate`.
#[instrument(skip(store, principal, request), fields(principal = %principal.id(), org_id = %request.org_id))]
pub async fn create(
    store: &dyn Store,
    principal: &Principal,
    request: CreateProjectRequest,
) -> Result<Project, ServiceError> {
    let org =
        organization::authorized(store, principal, request.org_id, PROJECT_CREATE_PERMISSION)
            .await?;
    let title = request.title.trim().to_string();
    let name = normalize_slug(
        non_empty(request.name.as_deref()).unwrap_or(&title),
        SLUG_MIN,
        SLUG_MAX,
    )
    .ok_or_else(|| ServiceError::invalid("invalid project name"))?;

    let now = Utc::now().trunc_subsecs(6);
    let project = Project {
        id: Uuid::new_v4(),
        title: if title.is_empty() { name.clone() } else { title },
        name,
        org_id: org.id,
        metadata: request.metadata.unwrap_or_default(),
        state: State::Enabled,
        created_at: now,
        updated_at: now,
    };
    store.insert_project(&project).await.map_err(|err| match err {
        StoreError::Conflict(_) => ServiceError::conflict("project already exists"),
        err => err.into(),
    })?;

    audit::emit(
        store,
        principal,
        audit::EVENT_PROJECT_CREATED,
        audit::AuditEntity::new(PROJECT_NAMESPACE, project.id, project.name.clone()),
        None,
        Some(org.id),
    )
    .await;
    Ok(project)
}

/// Projects of an organization. Requires `projectlist`.
///
/// # Errors
/// `NotFound`, `PermissionDenied` without `projectlist`.
pub async fn list(
    store: &dyn Store,
    principal: &Principal,
    org_id: Uuid,
) -> Result<Vec<Project>, ServiceError> {
    organization::authorized(store, principal, org_id, PROJECT_LIST_PERMISSION).await?;
    Ok(store.fetch_projects(org_id).await?)
}

/// # Errors
/// `NotFound`, `PermissionDenied` without `get`.
pub async fn get(store: &dyn Store, principal: &Principal, id: Uuid) -> Result<Project, ServiceError> {
    authorized(store, principal, id, GET_PERMISSION).await
}

/// # Errors
/// `NotFound`, `PermissionDenied` without `update`.
pub async fn update(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    request: UpdateProjectRequest,
) -> Result<Project, ServiceError> {
    let mut project = authorized(store, principal, id, UPDATE_PERMISSION).await?;
    if let Some(title) = non_empty(request.title.as_deref()) {
        project.title = title.to_string();
    }
    if let Some(metadata) = request.metadata {
        project.metadata = metadata;
    }
    project.updated_at = Utc::now().trunc_subsecs(6);
    if !store.update_project(&project).await? {
        return Err(ServiceError::NotFound("project"));
    }
    audit::emit(
        store,
        principal,
        audit::EVENT_PROJECT_UPDATED,
        audit::AuditEntity::new(PROJECT_NAMESPACE, project.id, project.name.clone()),
        None,
        Some(project.org_id),
    )
    .await;
    Ok(project)
}

/// Deletes the project and every policy on it.
///
/// # Errors
/// `NotFound`, `PermissionDenied` without `delete`.
pub async fn delete(store: &dyn Store, principal: &Principal, id: Uuid) -> Result<(), ServiceError> {
    let project = authorized(store, principal, id, DELETE_PERMISSION).await?;
    if !store.delete_project(id).await? {
        return Err(ServiceError::NotFound("project"));
    }
    audit::emit(
        store,
        principal,
        audit::EVENT_PROJECT_DELETED,
        audit::AuditEntity::new(PROJECT_NAMESPACE, project.id, project.name),
        None,
        Some(project.org_id),
    )
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        organization::{CreateOrganizationRequest, add_members},
        testing::{principal, seeded_store},
    };

    #[tokio::test]
    async fn owner_manages_projects_and_viewers_cannot_create() {
        let store = seeded_store().await;
        let alice = principal(store.as_ref(), "alice", false).await;
        let bob = principal(store.as_ref(), "bob", false).await;
        let org = organization::create(
            store.as_ref(),
            &alice,
            CreateOrganizationRequest::named("acme"),
        )
        .await
        .unwrap();
        add_members(store.as_ref(), &alice, org.id, &[bob.id()])
            .await
            .unwrap();

        let project = create(store.as_ref(), &alice, CreateProjectRequest::named(org.id, "Web App"))
            .await
            .unwrap();
        assert_eq!(project.name, "web-app");
        assert_eq!(list(store.as_ref(), &alice, org.id).await.unwrap().len(), 1);

        let err = create(store.as_ref(), &bob, CreateProjectRequest::named(org.id, "api"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied));

        let err = create(store.as_ref(), &alice, CreateProjectRequest::named(org.id, "web app"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let updated = update(
            store.as_ref(),
            &alice,
            project.id,
            UpdateProjectRequest {
                title: Some("Website".to_string()),
                metadata: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.title, "Website");

        delete(store.as_ref(), &alice, project.id).await.unwrap();
        assert!(matches!(
            get(store.as_ref(), &alice, project.id).await,
            Err(ServiceError::NotFound("project"))
        ));
    }
}
