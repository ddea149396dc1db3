//! Organizations and their members.
//!
//! The creator becomes the owner through an `app_organization_owner` policy
//! written in the same transaction as the organization. Membership is nothing
//! more than holding some policy on the organization, so adding a member binds
//! the viewer role and removing one deletes every policy the user holds on the
//! organization and its projects and groups.

use super::{
    Metadata, ServiceError, State, audit, non_empty,
    policy::{Policy, PolicyFilter},
    preference::{self, DISABLE_ORGS_LISTING, DISABLE_ORGS_ON_CREATE},
    slug::{SLUG_MAX, SLUG_MIN, normalize_slug},
    user::User,
};
use crate::{
    authz::{
        self, Principal, Resource,
        schema::{
            DELETE_PERMISSION, GET_PERMISSION, ORGANIZATION_NAMESPACE, ROLE_ORGANIZATION_OWNER,
            ROLE_ORGANIZATION_VIEWER,
            UPDATE_PERMISSION, USER_PRINCIPAL,
        },
    },
    rql::{DataType, Field, Page, RqlQuery, RqlSchema, Value, memory::RqlRecord},
    store::{MemberRemoval, Store, StoreError},
};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

pub static ORG_RQL_SCHEMA: RqlSchema = RqlSchema {
    table: "organizations",
    fields: &[
        Field::new("id", DataType::String),
        Field::new("name", DataType::String).searchable(),
        Field::new("title", DataType::String).searchable(),
        Field::new("state", DataType::String).groupable(),
        Field::new("created_at", DataType::Datetime),
        Field::new("updated_at", DataType::Datetime),
    ],
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub avatar: String,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub state: State,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    #[must_use]
    pub fn resource(&self) -> Resource {
        org_resource(self.id)
    }
}

impl RqlRecord for Organization {
    fn rql_value(&self, field: &str) -> Value {
        match field {
            "id" => Value::String(self.id.to_string()),
            "name" => Value::String(self.name.clone()),
            "title" => Value::String(self.title.clone()),
            "state" => Value::String(self.state.to_string()),
            "created_at" => Value::Datetime(self.created_at),
            "updated_at" => Value::Datetime(self.updated_at),
            _ => Value::None,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrganizationRequest {
    /// Slug; derived from the title when absent.
    pub name: Option<String>,
    #[serde(default)]
    pub title: String,
    pub avatar: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

#[cfg(test)]
impl CreateOrganizationRequest {
    pub(crate) fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            title: name.to_string(),
            avatar: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateOrganizationRequest {
    pub title: Option<String>,
    pub avatar: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddMembersRequest {
    pub user_ids: Vec<Uuid>,
}

pub(crate) fn org_resource(id: Uuid) -> Resource {
    Resource::new(ORGANIZATION_NAMESPACE, id.to_string())
}

fn user_resource(id: Uuid) -> Resource {
    Resource::new(USER_PRINCIPAL, id.to_string())
}

async fn role_id(store: &dyn Store, name: &str) -> Result<Uuid, ServiceError> {
    store
        .fetch_role_by_name(None, name)
        .await?
        .map(|role| role.id)
        .ok_or(ServiceError::NotFound("role"))
}

async fn find(store: &dyn Store, id_or_name: &str) -> Result<Organization, ServiceError> {
    let org = match Uuid::parse_str(id_or_name) {
        Ok(id) => store.fetch_org(id).await?,
        Err(_) => store.fetch_org_by_name(id_or_name).await?,
    };
    org.ok_or(ServiceError::NotFound("organization"))
}

/// Loads the organization and checks `permission` on it. Disabled
/// organizations are only reachable by superusers.
pub(crate) async fn authorized(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    permission: &str,
) -> Result<Organization, ServiceError> {
    let org = store
        .fetch_org(id)
        .await?
        .ok_or(ServiceError::NotFound("organization"))?;
    authz::require(store, principal, permission, &org.resource()).await?;
    if org.state == State::Disabled && !principal.superuser {
        return Err(ServiceError::precondition("organization is disabled"));
    }
    Ok(org)
}

/// Creates an organization owned by the caller.
///
/// # Errors
/// `InvalidArgument` when no valid slug can be derived, `Conflict` when the
/// name is already taken.
#[instrument(skip(store, principal, request), fields(principal = %principal.id()))]
pub async fn create(
    store: &dyn Store,
    principal: &Principal,
    request: CreateOrganizationRequest,
) -> Result<Organization, ServiceError> {
    let title = request.title.trim().to_string();
    let source = non_empty(request.name.as_deref()).unwrap_or(&title);
    let name = normalize_slug(source, SLUG_MIN, SLUG_MAX)
        .ok_or_else(|| ServiceError::invalid("invalid organization name"))?;

    let state = if preference::platform_flag(store, DISABLE_ORGS_ON_CREATE).await? {
        State::Disabled
    } else {
        State::Enabled
    };
    let owner_role = role_id(store, ROLE_ORGANIZATION_OWNER).await?;
    let now = Utc::now().trunc_subsecs(6);
    let org = Organization {
        id: Uuid::new_v4(),
        title: if title.is_empty() { name.clone() } else { title },
        name,
        avatar: request.avatar.unwrap_or_default(),
        metadata: request.metadata.unwrap_or_default(),
        state,
        created_at: now,
        updated_at: now,
    };
    let owner = Policy::new(owner_role, org.resource(), principal.subject());

    match store.insert_org(&org, &owner).await {
        Ok(()) => {}
        Err(StoreError::Conflict(_)) => {
            return Err(ServiceError::conflict(format!(
                "organization {} already exists",
                org.name
            )));
        }
        Err(err) => return Err(err.into()),
    }

    info!(org_id = %org.id, name = %org.name, "organization created");
    audit::emit(
        store,
        principal,
        audit::EVENT_ORG_CREATED,
        audit::AuditEntity::new(ORGANIZATION_NAMESPACE, org.id, org.name.clone()),
        None,
        Some(org.id),
    )
    .await;
    Ok(org)
}

/// Looks up an organization by id or name. Requires `get`.
///
/// # Errors
/// `NotFound`, `PermissionDenied`, or `FailedPrecondition` for disabled
/// organizations and non-superusers.
pub async fn get(
    store: &dyn Store,
    principal: &Principal,
    id_or_name: &str,
) -> Result<Organization, ServiceError> {
    let org = find(store, id_or_name).await?;
    authorized(store, principal, org.id, GET_PERMISSION).await
}

/// Lists every organization. Superuser only when `disable_orgs_listing` is on.
///
/// # Errors
/// `PermissionDenied` when listing is disabled, `InvalidArgument` for a bad query.
pub async fn list(
    store: &dyn Store,
    principal: &Principal,
    query: &RqlQuery,
) -> Result<Page<Organization>, ServiceError> {
    if !principal.superuser && preference::platform_flag(store, DISABLE_ORGS_LISTING).await? {
        return Err(ServiceError::PermissionDenied);
    }
    let compiled = query.compile(&ORG_RQL_SCHEMA)?;
    Ok(store.search_orgs(&compiled).await?)
}

/// Admin search. Superuser only.
///
/// # Errors
/// `PermissionDenied` for non-superusers, `InvalidArgument` for a bad query.
pub async fn search(
    store: &dyn Store,
    principal: &Principal,
    query: &RqlQuery,
) -> Result<Page<Organization>, ServiceError> {
    if !principal.superuser {
        return Err(ServiceError::PermissionDenied);
    }
    let compiled = query.compile(&ORG_RQL_SCHEMA)?;
    Ok(store.search_orgs(&compiled).await?)
}

/// # Errors
/// `NotFound`, `PermissionDenied` without `update`.
pub async fn update(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    request: UpdateOrganizationRequest,
) -> Result<Organization, ServiceError> {
    let mut org = authorized(store, principal, id, UPDATE_PERMISSION).await?;
    if let Some(title) = non_empty(request.title.as_deref()) {
        org.title = title.to_string();
    }
    if let Some(avatar) = request.avatar {
        org.avatar = avatar;
    }
    if let Some(metadata) = request.metadata {
        org.metadata = metadata;
    }
    org.updated_at = Utc::now().trunc_subsecs(6);
    if !store.update_org(&org).await? {
        return Err(ServiceError::NotFound("organization"));
    }
    audit::emit(
        store,
        principal,
        audit::EVENT_ORG_UPDATED,
        audit::AuditEntity::new(ORGANIZATION_NAMESPACE, org.id, org.name.clone()),
        None,
        Some(org.id),
    )
    .await;
    Ok(org)
}

/// Enables or disables an organization. Superuser only.
///
/// # Errors
/// `PermissionDenied` for non-superusers, `NotFound` for unknown ids.
pub async fn set_state(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    state: State,
) -> Result<Organization, ServiceError> {
    if !principal.superuser {
        return Err(ServiceError::PermissionDenied);
    }
    let mut org = store
        .fetch_org(id)
        .await?
        .ok_or(ServiceError::NotFound("organization"))?;
    org.state = state;
    org.updated_at = Utc::now().trunc_subsecs(6);
    if !store.update_org(&org).await? {
        return Err(ServiceError::NotFound("organization"));
    }
    let event = match state {
        State::Enabled => audit::EVENT_ORG_ENABLED,
        State::Disabled => audit::EVENT_ORG_DISABLED,
    };
    audit::emit(
        store,
        principal,
        event,
        audit::AuditEntity::new(ORGANIZATION_NAMESPACE, org.id, org.name.clone()),
        None,
        Some(org.id),
    )
    .await;
    Ok(org)
}

/// Deletes the organization with its projects, groups, preferences and policies.
///
/// # Errors
/// `NotFound`, `PermissionDenied` without `delete`.
#[instrument(skip(store, principal), fields(principal = %principal.id()))]
pub async fn delete(store: &dyn Store, principal: &Principal, id: Uuid) -> Result<(), ServiceError> {
    let org = authorized(store, principal, id, DELETE_PERMISSION).await?;
    if !store.delete_org(id).await? {
        return Err(ServiceError::NotFound("organization"));
    }
    info!(org_id = %id, "organization deleted");
    audit::emit(
        store,
        principal,
        audit::EVENT_ORG_DELETED,
        audit::AuditEntity::new(ORGANIZATION_NAMESPACE, org.id, org.name),
        None,
        Some(org.id),
    )
    .await;
    Ok(())
}

/// Users holding any policy on the organization. Requires `get`.
///
/// # Errors
/// `NotFound`, `PermissionDenied` without `get`.
pub async fn list_members(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
) -> Result<Vec<User>, ServiceError> {
    let org = authorized(store, principal, id, GET_PERMISSION).await?;
    let policies = store
        .fetch_policies(&PolicyFilter {
            resources: vec![org.resource()],
            ..PolicyFilter::default()
        })
        .await?;
    let ids: Vec<Uuid> = policies
        .iter()
        .filter(|policy| policy.principal.namespace == USER_PRINCIPAL)
        .filter_map(|policy| Uuid::parse_str(&policy.principal.id).ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(store.fetch_users(&ids).await?)
}

/// Adds users as viewers. Users that are already members are left alone.
///
/// # Errors
/// `NotFound` for unknown users, `PermissionDenied` without `update`.
pub async fn add_members(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    user_ids: &[Uuid],
) -> Result<(), ServiceError> {
    let org = authorized(store, principal, id, UPDATE_PERMISSION).await?;
    let viewer = role_id(store, ROLE_ORGANIZATION_VIEWER).await?;

    let users = store.fetch_users(user_ids).await?;
    if users.len() != user_ids.iter().collect::<BTreeSet<_>>().len() {
        return Err(ServiceError::NotFound("user"));
    }

    for user in users {
        let subject = user_resource(user.id);
        let existing = store
            .fetch_policies(&PolicyFilter {
                resources: vec![org.resource()],
                principals: vec![subject.clone()],
                role_id: None,
            })
            .await?;
        if !existing.is_empty() {
            continue;
        }
        store
            .insert_policy(&Policy::new(viewer, org.resource(), subject))
            .await?;
        audit::emit(
            store,
            principal,
            audit::EVENT_ORG_MEMBER_CREATED,
            audit::AuditEntity::new(ORGANIZATION_NAMESPACE, org.id, org.name.clone()),
            Some(audit::AuditEntity::new(USER_PRINCIPAL, user.id, user.email)),
            Some(org.id),
        )
        .await;
    }
    Ok(())
}

/// Removes a user from the organization, its projects and its groups.
///
/// # Errors
/// `FailedPrecondition` when the user is the last owner, `NotFound` when the
/// user is not a member, `PermissionDenied` without `update`.
#[instrument(skip(store, principal), fields(principal = %principal.id()))]
pub async fn remove_member(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    user_id: Uuid,
) -> Result<(), ServiceError> {
    let org = authorized(store, principal, id, UPDATE_PERMISSION).await?;
    let subject = user_resource(user_id);
    let owner = role_id(store, ROLE_ORGANIZATION_OWNER).await?;

    let removed = match store.remove_org_member(org.id, &subject, owner).await? {
        MemberRemoval::Removed(removed) => removed,
        MemberRemoval::NotMember => return Err(ServiceError::NotFound("member")),
        MemberRemoval::LastOwner => {
            return Err(ServiceError::precondition(
                "cannot remove the last owner of an organization",
            ));
        }
    };
    info!(org_id = %org.id, user_id = %user_id, removed, "member removed");

    audit::emit(
        store,
        principal,
        audit::EVENT_ORG_MEMBER_DELETED,
        audit::AuditEntity::new(ORGANIZATION_NAMESPACE, org.id, org.name),
        Some(audit::AuditEntity::new(USER_PRINCIPAL, user_id, "")),
        Some(org.id),
    )
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        preference::{PreferenceInput, Scope},
        testing::{principal, seeded_store},
    };

    async fn enable_flag(store: &dyn Store, admin: &Principal, name: &str) {
        preference::set(
            store,
            admin,
            Scope::Platform,
            vec![PreferenceInput {
                name: name.to_string(),
                value: "true".to_string(),
            }],
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn duplicate_slug_conflicts() {
        let store = seeded_store().await;
        let alice = principal(store.as_ref(), "alice", false).await;

        let first = create(store.as_ref(), &alice, CreateOrganizationRequest::named("Acme Inc"))
            .await
            .unwrap();
        assert_eq!(first.name, "acme-inc");
        for name in ["acme inc", "ACME-INC"] {
            assert!(matches!(
                create(store.as_ref(), &alice, CreateOrganizationRequest::named(name)).await,
                Err(ServiceError::Conflict(_))
            ));
        }
        let page = list(store.as_ref(), &alice, &RqlQuery::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn creator_owns_the_organization() {
        let store = seeded_store().await;
        let alice = principal(store.as_ref(), "alice", false).await;
        let bob = principal(store.as_ref(), "bob", false).await;
        let org = create(store.as_ref(), &alice, CreateOrganizationRequest::named("acme"))
            .await
            .unwrap();

        assert_eq!(get(store.as_ref(), &alice, "acme").await.unwrap().id, org.id);
        assert!(matches!(
            get(store.as_ref(), &bob, "acme").await,
            Err(ServiceError::PermissionDenied)
        ));

        let orgs = crate::domain::user::organizations(store.as_ref(), &alice)
            .await
            .unwrap();
        assert_eq!(orgs.len(), 1);
    }

    #[tokio::test]
    async fn disabled_on_create_blocks_non_superusers() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;
        let alice = principal(store.as_ref(), "alice", false).await;
        enable_flag(store.as_ref(), &admin, DISABLE_ORGS_ON_CREATE).await;

        let org = create(store.as_ref(), &alice, CreateOrganizationRequest::named("acme"))
            .await
            .unwrap();
        assert_eq!(org.state, State::Disabled);
        assert!(matches!(
            get(store.as_ref(), &alice, "acme").await,
            Err(ServiceError::FailedPrecondition(_))
        ));
        assert!(get(store.as_ref(), &admin, "acme").await.is_ok());

        set_state(store.as_ref(), &admin, org.id, State::Enabled)
            .await
            .unwrap();
        assert!(get(store.as_ref(), &alice, "acme").await.is_ok());
    }

    #[tokio::test]
    async fn listing_can_be_restricted() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;
        let alice = principal(store.as_ref(), "alice", false).await;
        create(store.as_ref(), &alice, CreateOrganizationRequest::named("acme"))
            .await
            .unwrap();

        let page = list(store.as_ref(), &alice, &RqlQuery::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);

        enable_flag(store.as_ref(), &admin, DISABLE_ORGS_LISTING).await;
        assert!(matches!(
            list(store.as_ref(), &alice, &RqlQuery::default()).await,
            Err(ServiceError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn members_are_added_as_viewers_and_removed() {
        let store = seeded_store().await;
        let alice = principal(store.as_ref(), "alice", false).await;
        let bob = principal(store.as_ref(), "bob", false).await;
        let org = create(store.as_ref(), &alice, CreateOrganizationRequest::named("acme"))
            .await
            .unwrap();

        add_members(store.as_ref(), &alice, org.id, &[bob.id(), bob.id()])
            .await
            .unwrap();
        let members = list_members(store.as_ref(), &alice, org.id).await.unwrap();
        assert_eq!(members.len(), 2);

        // viewers can read but not manage
        assert!(get(store.as_ref(), &bob, "acme").await.is_ok());
        assert!(matches!(
            add_members(store.as_ref(), &bob, org.id, &[bob.id()]).await,
            Err(ServiceError::PermissionDenied)
        ));

        remove_member(store.as_ref(), &alice, org.id, bob.id())
            .await
            .unwrap();
        assert!(matches!(
            get(store.as_ref(), &bob, "acme").await,
            Err(ServiceError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn last_owner_cannot_be_removed() {
        let store = seeded_store().await;
        let alice = principal(store.as_ref(), "alice", false).await;
        let org = create(store.as_ref(), &alice, CreateOrganizationRequest::named("acme"))
            .await
            .unwrap();
        let err = remove_member(store.as_ref(), &alice, org.id, alice.id())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn owners_removing_each_other_keep_one_owner() {
        let store = seeded_store().await;
        let alice = principal(store.as_ref(), "alice", false).await;
        let bob = principal(store.as_ref(), "bob", false).await;
        let org = create(store.as_ref(), &alice, CreateOrganizationRequest::named("acme"))
            .await
            .unwrap();
        let owner = role_id(store.as_ref(), ROLE_ORGANIZATION_OWNER).await.unwrap();
        store
            .insert_policy(&Policy::new(owner, org.resource(), user_resource(bob.id())))
            .await
            .unwrap();

        let (by_alice, by_bob) = tokio::join!(
            remove_member(store.as_ref(), &alice, org.id, bob.id()),
            remove_member(store.as_ref(), &bob, org.id, alice.id()),
        );
        let outcomes = [by_alice, by_bob];
        assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
        assert!(outcomes.iter().any(|outcome| matches!(
            outcome,
            Err(ServiceError::FailedPrecondition(_) | ServiceError::PermissionDenied)
        )));

        let owners = store
            .fetch_policies(&PolicyFilter {
                resources: vec![org.resource()],
                role_id: Some(owner),
                ..PolicyFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(owners.len(), 1);
    }

    #[tokio::test]
    async fn state_changes_are_audited() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;
        let alice = principal(store.as_ref(), "alice", false).await;
        let org = create(store.as_ref(), &alice, CreateOrganizationRequest::named("acme"))
            .await
            .unwrap();

        assert!(matches!(
            set_state(store.as_ref(), &alice, org.id, State::Disabled).await,
            Err(ServiceError::PermissionDenied)
        ));
        let disabled = set_state(store.as_ref(), &admin, org.id, State::Disabled)
            .await
            .unwrap();
        assert_eq!(disabled.state, State::Disabled);
        assert!(matches!(
            set_state(store.as_ref(), &admin, Uuid::new_v4(), State::Enabled).await,
            Err(ServiceError::NotFound("organization"))
        ));

        let log = audit::list_for_org(store.as_ref(), &admin, org.id, RqlQuery::default())
            .await
            .unwrap();
        let events: Vec<&str> = log.items.iter().map(|record| record.event.as_str()).collect();
        assert!(events.contains(&audit::EVENT_ORG_DISABLED));
        assert!(!events.contains(&audit::EVENT_ORG_ENABLED));
    }

    #[tokio::test]
    async fn delete_cascades() {
        let store = seeded_store().await;
        let alice = principal(store.as_ref(), "alice", false).await;
        let org = create(store.as_ref(), &alice, CreateOrganizationRequest::named("acme"))
            .await
            .unwrap();
        delete(store.as_ref(), &alice, org.id).await.unwrap();

        assert!(store.fetch_org(org.id).await.unwrap().is_none());
        let remaining = store
            .fetch_policies(&PolicyFilter {
                resources: vec![org.resource()],
                ..PolicyFilter::default()
            })
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }
}
