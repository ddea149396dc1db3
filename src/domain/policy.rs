//! Policies bind a role to a principal on a resource.

use super::{ServiceError, audit, role::Role};
use crate::{
    authz::{
        self, Principal, Resource,
        schema::{
            GROUP_NAMESPACE, ORGANIZATION_NAMESPACE, POLICY_MANAGE_PERMISSION, PROJECT_NAMESPACE,
            USER_PRINCIPAL,
        },
    },
    store::Store,
};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Policy {
    pub id: Uuid,
    pub role_id: Uuid,
    pub resource: Resource,
    pub principal: Resource,
    pub created_at: DateTime<Utc>,
}

impl Policy {
    #[must_use]
    pub fn new(role_id: Uuid, resource: Resource, principal: Resource) -> Self {
        Self {
            id: Uuid::new_v4(),
            role_id,
            resource,
            principal,
            created_at: Utc::now().trunc_subsecs(6),
        }
    }
}

/// Empty vectors match everything.
#[derive(Debug, Clone, Default)]
pub struct PolicyFilter {
    pub resources: Vec<Resource>,
    pub principals: Vec<Resource>,
    pub role_id: Option<Uuid>,
}

impl PolicyFilter {
    #[must_use]
    pub fn matches(&self, policy: &Policy) -> bool {
        (self.resources.is_empty() || self.resources.contains(&policy.resource))
            && (self.principals.is_empty() || self.principals.contains(&policy.principal))
            && self.role_id.is_none_or(|role_id| role_id == policy.role_id)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePolicyRequest {
    pub role_id: Uuid,
    /// `namespace:id`, aliases such as `org:<id>` accepted.
    pub resource: String,
    /// `namespace:id`, for example `user:<id>` or `group:<id>`.
    pub principal: String,
}

#[derive(Debug, Default, Deserialize, ToSchema, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListPoliciesQuery {
    pub org_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
}

/// The organization a policy resource belongs to.
async fn owning_org(store: &dyn Store, resource: &Resource) -> Result<Uuid, ServiceError> {
    let id = Uuid::parse_str(&resource.id)
        .map_err(|_| ServiceError::invalid("resource id must be a uuid"))?;
    match resource.namespace.as_str() {
        ORGANIZATION_NAMESPACE => store
            .fetch_org(id)
            .await?
            .map(|org| org.id)
            .ok_or(ServiceError::NotFound("organization")),
        PROJECT_NAMESPACE => store
            .fetch_project(id)
            .await?
            .map(|project| project.org_id)
            .ok_or(ServiceError::NotFound("project")),
        GROUP_NAMESPACE => store
            .fetch_group(id)
            .await?
            .map(|group| group.org_id)
            .ok_or(ServiceError::NotFound("group")),
        _ => Err(ServiceError::invalid("unsupported policy resource")),
    }
}

async fn authorize(
    store: &dyn Store,
    principal: &Principal,
    resource: &Resource,
) -> Result<Uuid, ServiceError> {
    let org_id = owning_org(store, resource).await?;
    let org = Resource::new(ORGANIZATION_NAMESPACE, org_id.to_string());
    authz::require(store, principal, POLICY_MANAGE_PERMISSION, &org).await?;
    Ok(org_id)
}

fn role_usable_in(role: &Role, org_id: Uuid) -> bool {
    role.org_id.is_none_or(|owner| owner == org_id)
}

/// Creates a policy. Requires `policymanage` on the owning organization; the
/// role must be a platform role or belong to that organization.
///
/// # Errors
/// `InvalidArgument` for malformed resources or a foreign role, `NotFound`
/// for unknown roles or resources, `PermissionDenied` without `policymanage`.
#[instrument(skip(store, principal, request), fields(principal = %principal.id()))]
pub async fn create(
    store: &dyn Store,
    principal: &Principal,
    request: CreatePolicyRequest,
) -> Result<Policy, ServiceError> {
    let resource = Resource::parse(&request.resource)
        .map_err(|err| ServiceError::invalid(err.to_string()))?;
    let subject = Resource::parse(&request.principal)
        .map_err(|err| ServiceError::invalid(err.to_string()))?;

    let org_id = authorize(store, principal, &resource).await?;
    let role = store
        .fetch_role(request.role_id)
        .await?
        .ok_or(ServiceError::NotFound("role"))?;
    if !role_usable_in(&role, org_id) {
        return Err(ServiceError::invalid("role belongs to another organization"));
    }

    let policy = Policy::new(role.id, resource, subject);
    store.insert_policy(&policy).await?;
    audit::emit(
        store,
        principal,
        audit::EVENT_POLICY_CREATED,
        audit::AuditEntity::new("app/policy", policy.id, role.name),
        Some(audit::AuditEntity::new(
            &policy.principal.namespace,
            &policy.principal.id,
            "",
        )),
        Some(org_id),
    )
    .await;
    Ok(policy)
}

/// # Errors
/// `NotFound` for an unknown policy, `PermissionDenied` without `policymanage`.
pub async fn get(store: &dyn Store, principal: &Principal, id: Uuid) -> Result<Policy, ServiceError> {
    let policy = store
        .fetch_policy(id)
        .await?
        .ok_or(ServiceError::NotFound("policy"))?;
    authorize(store, principal, &policy.resource).await?;
    Ok(policy)
}

/// Deletes a policy. Requires `policymanage` on the owning organization.
///
/// # Errors
/// `NotFound` for an unknown policy, `PermissionDenied` without `policymanage`.
#[instrument(skip(store, principal), fields(principal = %principal.id()))]
pub async fn delete(store: &dyn Store, principal: &Principal, id: Uuid) -> Result<(), ServiceError> {
    let policy = store
        .fetch_policy(id)
        .await?
        .ok_or(ServiceError::NotFound("policy"))?;
    let org_id = authorize(store, principal, &policy.resource).await?;
    if !store.delete_policy(id).await? {
        return Err(ServiceError::NotFound("policy"));
    }
    audit::emit(
        store,
        principal,
        audit::EVENT_POLICY_DELETED,
        audit::AuditEntity::new("app/policy", policy.id, ""),
        None,
        Some(org_id),
    )
    .await;
    Ok(())
}

/// Lists policies on one resource. Exactly one of org, project or group must
/// be given; user and role narrow the result.
///
/// # Errors
/// `InvalidArgument` without a resource, `PermissionDenied` without `policymanage`.
pub async fn list(
    store: &dyn Store,
    principal: &Principal,
    query: &ListPoliciesQuery,
) -> Result<Vec<Policy>, ServiceError> {
    let resource = match (query.org_id, query.project_id, query.group_id) {
        (Some(id), None, None) => Resource::new(ORGANIZATION_NAMESPACE, id.to_string()),
        (None, Some(id), None) => Resource::new(PROJECT_NAMESPACE, id.to_string()),
        (None, None, Some(id)) => Resource::new(GROUP_NAMESPACE, id.to_string()),
        _ => {
            return Err(ServiceError::invalid(
                "exactly one of org_id, project_id or group_id is required",
            ));
        }
    };
    authorize(store, principal, &resource).await?;

    let principals = query
        .user_id
        .map(|id| vec![Resource::new(USER_PRINCIPAL, id.to_string())])
        .unwrap_or_default();
    Ok(store
        .fetch_policies(&PolicyFilter {
            resources: vec![resource],
            principals,
            role_id: query.role_id,
        })
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authz::schema::ROLE_PROJECT_VIEWER,
        domain::{
            organization::{self, CreateOrganizationRequest},
            project::{self, CreateProjectRequest},
            testing::{principal, seeded_store},
        },
    };

    #[test]
    fn empty_filter_matches_everything() {
        let policy = Policy::new(
            Uuid::new_v4(),
            Resource::new("org", "1"),
            Resource::new("user", "2"),
        );
        assert!(PolicyFilter::default().matches(&policy));
        assert!(
            PolicyFilter {
                principals: vec![Resource::new("app/user", "2")],
                ..PolicyFilter::default()
            }
            .matches(&policy)
        );
        assert!(
            !PolicyFilter {
                role_id: Some(Uuid::new_v4()),
                ..PolicyFilter::default()
            }
            .matches(&policy)
        );
    }

    #[tokio::test]
    async fn org_owner_manages_project_policies() {
        let store = seeded_store().await;
        let owner = principal(store.as_ref(), "owner", false).await;
        let viewer = principal(store.as_ref(), "viewer", false).await;
        let org = organization::create(
            store.as_ref(),
            &owner,
            CreateOrganizationRequest::named("acme"),
        )
        .await
        .unwrap();
        let project = project::create(
            store.as_ref(),
            &owner,
            CreateProjectRequest::named(org.id, "web"),
        )
        .await
        .unwrap();
        let role = store
            .fetch_role_by_name(None, ROLE_PROJECT_VIEWER)
            .await
            .unwrap()
            .unwrap();

        let policy = create(
            store.as_ref(),
            &owner,
            CreatePolicyRequest {
                role_id: role.id,
                resource: format!("project:{}", project.id),
                principal: format!("user:{}", viewer.id()),
            },
        )
        .await
        .unwrap();
        assert_eq!(policy.resource.namespace, PROJECT_NAMESPACE);

        let listed = list(
            store.as_ref(),
            &owner,
            &ListPoliciesQuery {
                project_id: Some(project.id),
                ..ListPoliciesQuery::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(listed, vec![policy.clone()]);

        // the viewer cannot manage policies
        assert!(matches!(
            delete(store.as_ref(), &viewer, policy.id).await,
            Err(ServiceError::PermissionDenied)
        ));
        delete(store.as_ref(), &owner, policy.id).await.unwrap();
        assert!(matches!(
            get(store.as_ref(), &owner, policy.id).await,
            Err(ServiceError::NotFound("policy"))
        ));
    }

    #[tokio::test]
    async fn list_requires_one_resource() {
        let store = seeded_store().await;
        let owner = principal(store.as_ref(), "owner", false).await;
        let err = list(store.as_ref(), &owner, &ListPoliciesQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }
}
