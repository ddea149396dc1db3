//! Roles are named sets of permission slugs. Platform roles (`org_id` unset)
//! are usable everywhere; organization roles only inside their organization.

use super::{Metadata, ServiceError, State, audit, non_empty, organization};
use crate::{
    authz::{
        Principal,
        schema::{GET_PERMISSION, ORGANIZATION_NAMESPACE, ROLE_MANAGE_PERMISSION},
    },
    store::{Store, StoreError},
};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub org_id: Option<Uuid>,
    /// Permission slugs such as `app_project_get`.
    pub permissions: Vec<String>,
    /// Namespaces the role is meant to be bound on.
    pub scopes: Vec<String>,
    pub state: State,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    #[must_use]
    pub fn new(
        org_id: Option<Uuid>,
        name: &str,
        title: &str,
        permissions: Vec<String>,
        scopes: Vec<String>,
    ) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            title: title.to_string(),
            org_id,
            permissions,
            scopes,
            state: State::Enabled,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRoleRequest {
    pub name: String,
    pub title: Option<String>,
    pub permissions: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

async fn build(
    store: &dyn Store,
    org_id: Option<Uuid>,
    request: CreateRoleRequest,
) -> Result<Role, ServiceError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ServiceError::invalid("role name is required"));
    }
    if request.permissions.is_empty() {
        return Err(ServiceError::invalid("role needs at least one permission"));
    }

    let known: BTreeSet<String> = store
        .fetch_permissions()
        .await?
        .into_iter()
        .map(|permission| permission.slug)
        .collect();
    if let Some(missing) = request
        .permissions
        .iter()
        .find(|permission| !known.contains(*permission))
    {
        return Err(ServiceError::invalid(format!(
            "permission {missing} does not exist"
        )));
    }

    let title = non_empty(request.title.as_deref()).unwrap_or(name).to_string();
    let mut role = Role::new(org_id, name, &title, request.permissions, request.scopes);
    role.metadata = request.metadata.unwrap_or_default();
    Ok(role)
}

async fn insert(store: &dyn Store, role: &Role) -> Result<(), ServiceError> {
    if store.fetch_role_by_name(role.org_id, &role.name).await?.is_some() {
        return Err(ServiceError::conflict("role already exists"));
    }
    match store.upsert_role(role).await {
        Ok(_) => Ok(()),
        Err(StoreError::Conflict(_)) => Err(ServiceError::conflict("role already exists")),
        Err(err) => Err(err.into()),
    }
}

/// # Errors
/// Returns a store error if roles cannot be loaded.
pub async fn list_platform(store: &dyn Store) -> Result<Vec<Role>, ServiceError> {
    Ok(store.fetch_roles(None).await?)
}

/// Creates a platform role. Superuser only.
///
/// # Errors
/// `PermissionDenied` for non-superusers, `InvalidArgument` for unknown
/// permissions, `Conflict` for a taken name.
#[instrument(skip(store, principal, request), fields(principal = %principal.id()))]
pub async fn create_platform(
    store: &dyn Store,
    principal: &Principal,
    request: CreateRoleRequest,
) -> Result<Role, ServiceError> {
    if !principal.superuser {
        return Err(ServiceError::PermissionDenied);
    }
    let role = build(store, None, request).await?;
    insert(store, &role).await?;
    Ok(role)
}

/// Roles defined by an organization. Requires `get` on it.
///
/// # Errors
/// `NotFound`, `PermissionDenied` without `get`.
pub async fn list_for_org(
    store: &dyn Store,
    principal: &Principal,
    org_id: Uuid,
) -> Result<Vec<Role>, ServiceError> {
    organization::authorized(store, principal, org_id, GET_PERMISSION).await?;
    Ok(store.fetch_roles(Some(org_id)).await?)
}

/// Creates an organization role. Requires `rolemanage` on the organization.
///
/// # Errors
/// `PermissionDenied` without `rolemanage`, `InvalidArgument` for unknown
/// permissions, `Conflict` for a taken name.
#[instrument(skip(store, principal, request), fields(principal = %principal.id()))]
pub async fn create_for_org(
    store: &dyn Store,
    principal: &Principal,
    org_id: Uuid,
    request: CreateRoleRequest,
) -> Result<Role, ServiceError> {
    let org = organization::authorized(store, principal, org_id, ROLE_MANAGE_PERMISSION).await?;
    let mut role = build(store, Some(org.id), request).await?;
    if role.scopes.is_empty() {
        role.scopes = vec![ORGANIZATION_NAMESPACE.to_string()];
    }
    insert(store, &role).await?;
    audit::emit(
        store,
        principal,
        audit::EVENT_ROLE_CREATED,
        audit::AuditEntity::new("app/role", role.id, role.name.clone()),
        None,
        Some(org.id),
    )
    .await;
    Ok(role)
}
