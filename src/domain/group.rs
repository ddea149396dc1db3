//! Groups: named sets of users inside an organization that can themselves be
//! policy principals.

use super::{
    Metadata, ServiceError, State, audit, non_empty, organization,
    policy::{Policy, PolicyFilter},
    slug::{SLUG_MAX, SLUG_MIN, normalize_slug},
};
use crate::{
    authz::{
        self, Principal, Resource,
        schema::{
            DELETE_PERMISSION, GET_PERMISSION, GROUP_CREATE_PERMISSION, GROUP_LIST_PERMISSION,
            GROUP_NAMESPACE, ROLE_GROUP_MEMBER, ROLE_GROUP_OWNER, UPDATE_PERMISSION,
            USER_PRINCIPAL,
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
pub struct Group {
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

impl Group {
    #[must_use]
    pub fn resource(&self) -> Resource {
        Resource::new(GROUP_NAMESPACE, self.id.to_string())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateGroupRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub title: String,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

async fn role_id(store: &dyn Store, name: &str) -> Result<Uuid, ServiceError> {
    store
        .fetch_role_by_name(None, name)
        .await?
        .map(|role| role.id)
        .ok_or(ServiceError::NotFound("role"))
}

/// Loads a group of `org_id` and checks `permission` on it.
async fn authorized(
    store: &dyn Store,
    principal: &Principal,
    org_id: Uuid,
    id: Uuid,
    permission: &str,
) -> Result<Group, ServiceError> {
    let group = store
        .fetch_group(id)
        .await?
        .filter(|group| group.org_id == org_id)
        .ok_or(ServiceError::NotFound("group"))?;
    authz::require(store, principal, permission, &group.resource()).await?;
    Ok(group)
}

/// Creates a group owned by the caller. Requires `groupcreate` on the organization.
///
/// # Errors
/// `InvalidArgument` for a bad name, `Conflict` when the name is taken in the
/// organization, `PermissionDenied` without `groupcreate`.
#[instrument(skip(store, principal, request), fields(principal = %principal.id()))]
pub async fn create(
    store: &dyn Store,
    principal: &Principal,
    org_id: Uuid,
    request: CreateGroupRequest,
) -> Result<Group, ServiceError> {
    let org = organization::authorized(store, principal, org_id, GROUP_CREATE_PERMISSION).await?;
    let title = request.title.trim().to_string();
    let name = normalize_slug(
        non_empty(request.name.as_deref()).unwrap_or(&title),
        SLUG_MIN,
        SLUG_MAX,
    )
    .ok_or_else(|| ServiceError::invalid("invalid group name"))?;

    let now = Utc::now().trunc_subsecs(6);
    let group = Group {
        id: Uuid::new_v4(),
        title: if title.is_empty() { name.clone() } else { title },
        name,
        org_id: org.id,
        metadata: request.metadata.unwrap_or_default(),
        state: State::Enabled,
        created_at: now,
        updated_at: now,
    };
    let owner = Policy::new(
        role_id(store, ROLE_GROUP_OWNER).await?,
        group.resource(),
        principal.subject(),
    );
    store
        .insert_group(&group, &owner)
        .await
        .map_err(|err| match err {
            StoreError::Conflict(_) => ServiceError::conflict("group already exists"),
            err => err.into(),
        })?;

    audit::emit(
        store,
        principal,
        audit::EVENT_GROUP_CREATED,
        audit::AuditEntity::new(GROUP_NAMESPACE, group.id, group.name.clone()),
        None,
        Some(org.id),
    )
    .await;
    Ok(group)
}

/// Groups of an organization. Requires `grouplist`.
///
/// # Errors
/// `NotFound`, `PermissionDenied` without `grouplist`.
pub async fn list(
    store: &dyn Store,
    principal: &Principal,
    org_id: Uuid,
) -> Result<Vec<Group>, ServiceError> {
    organization::authorized(store, principal, org_id, GROUP_LIST_PERMISSION).await?;
    Ok(store.fetch_groups(org_id).await?)
}

/// # Errors
/// `NotFound`, `PermissionDenied` without `get`.
pub async fn get(
    store: &dyn Store,
    principal: &Principal,
    org_id: Uuid,
    id: Uuid,
) -> Result<Group, ServiceError> {
    authorized(store, principal, org_id, id, GET_PERMISSION).await
}

/// Deletes the group, every policy on it and every policy naming it.
///
/// # Errors
/// `NotFound`, `PermissionDenied` without `delete`.
pub async fn delete(
    store: &dyn Store,
    principal: &Principal,
    org_id: Uuid,
    id: Uuid,
) -> Result<(), ServiceError> {
    let group = authorized(store, principal, org_id, id, DELETE_PERMISSION).await?;
    if !store.delete_group(id).await? {
        return Err(ServiceError::NotFound("group"));
    }
    audit::emit(
        store,
        principal,
        audit::EVENT_GROUP_DELETED,
        audit::AuditEntity::new(GROUP_NAMESPACE, group.id, group.name),
        None,
        Some(org_id),
    )
    .await;
    Ok(())
}

/// Binds each user to the group as `app_group_member`. Requires `update` on the group.
///
/// # Errors
/// `NotFound` for unknown users, `PermissionDenied` without `update`.
pub async fn add_members(
    store: &dyn Store,
    principal: &Principal,
    org_id: Uuid,
    id: Uuid,
    user_ids: &[Uuid],
) -> Result<(), ServiceError> {
    let group = authorized(store, principal, org_id, id, UPDATE_PERMISSION).await?;
    let member = role_id(store, ROLE_GROUP_MEMBER).await?;

    for user_id in user_ids {
        let user = store
            .fetch_user(*user_id)
            .await?
            .ok_or(ServiceError::NotFound("user"))?;
        let subject = Resource::new(USER_PRINCIPAL, user.id.to_string());
        let existing = store
            .fetch_policies(&PolicyFilter {
                resources: vec![group.resource()],
                principals: vec![subject.clone()],
                role_id: None,
            })
            .await?;
        if !existing.is_empty() {
            continue;
        }
        store
            .insert_policy(&Policy::new(member, group.resource(), subject))
            .await?;
        audit::emit(
            store,
            principal,
            audit::EVENT_GROUP_MEMBER_CREATED,
            audit::AuditEntity::new(GROUP_NAMESPACE, group.id, group.name.clone()),
            Some(audit::AuditEntity::new(USER_PRINCIPAL, user.id, user.email)),
            Some(org_id),
        )
        .await;
    }
    Ok(())
}

/// Deletes the user's policies on the group. Requires `update` on the group.
///
/// # Errors
/// `NotFound` when the user is not a member, `PermissionDenied` without `update`.
pub async fn remove_member(
    store: &dyn Store,
    principal: &Principal,
    org_id: Uuid,
    id: Uuid,
    user_id: Uuid,
) -> Result<(), ServiceError> {
    let group = authorized(store, principal, org_id, id, UPDATE_PERMISSION).await?;
    let removed = store
        .delete_policies(&PolicyFilter {
            resources: vec![group.resource()],
            principals: vec![Resource::new(USER_PRINCIPAL, user_id.to_string())],
            role_id: None,
        })
        .await?;
    if removed == 0 {
        return Err(ServiceError::NotFound("member"));
    }
    audit::emit(
        store,
        principal,
        audit::EVENT_GROUP_MEMBER_DELETED,
        audit::AuditEntity::new(GROUP_NAMESPACE, group.id, group.name),
        Some(audit::AuditEntity::new(USER_PRINCIPAL, user_id, "")),
        Some(org_id),
    )
    .await;
    Ok(())
}
