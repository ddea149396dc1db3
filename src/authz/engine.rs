//! Permission checks over the policy table.
//!
//! A check gathers the subjects that stand for the caller (the user and every
//! group the user holds a policy on) and the resource chain (the resource and,
//! for projects and groups, the parent organization). Any policy binding one
//! of those subjects to a chain element through a role that carries a
//! matching permission slug grants access.

use super::{
    Principal, Resource,
    schema::{
        ADMINISTER_PERMISSION, GROUP_NAMESPACE, GROUP_PRINCIPAL, MEMBERSHIP_PERMISSION,
        ORGANIZATION_NAMESPACE, PROJECT_NAMESPACE, permission_slug,
    },
};
use crate::{
    domain::{ServiceError, policy::PolicyFilter},
    store::Store,
};
use std::collections::BTreeSet;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Returns whether `principal` holds `permission` on `resource`.
///
/// # Errors
/// Returns a store error if policies, roles or parents cannot be loaded.
#[instrument(skip(store, principal, resource), fields(principal = %principal.id(), resource = %resource))]
pub async fn check(
    store: &dyn Store,
    principal: &Principal,
    permission: &str,
    resource: &Resource,
) -> Result<bool, ServiceError> {
    if principal.superuser {
        return Ok(true);
    }

    let subjects = subjects(store, principal).await?;
    let parent = parent_org(store, resource).await?;

    let mut chain = vec![resource.clone()];
    if let Some(org) = &parent {
        chain.push(org.clone());
    }

    let policies = store
        .fetch_policies(&PolicyFilter {
            resources: chain,
            principals: subjects,
            role_id: None,
        })
        .await?;

    if permission == MEMBERSHIP_PERMISSION && resource.namespace == ORGANIZATION_NAMESPACE {
        return Ok(policies.iter().any(|policy| policy.resource == *resource));
    }

    let role_ids: Vec<Uuid> = policies
        .iter()
        .map(|policy| policy.role_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if role_ids.is_empty() {
        debug!("no policies bind the caller to the resource chain");
        return Ok(false);
    }
    let roles = store.fetch_roles_by_ids(&role_ids).await?;

    let direct = [
        permission_slug(&resource.namespace, permission),
        permission_slug(&resource.namespace, ADMINISTER_PERMISSION),
    ];
    let org_administer = permission_slug(ORGANIZATION_NAMESPACE, ADMINISTER_PERMISSION);

    let granted = policies.iter().any(|policy| {
        let Some(role) = roles.iter().find(|role| role.id == policy.role_id) else {
            return false;
        };
        let inherited = parent.as_ref() == Some(&policy.resource);
        role.permissions.iter().any(|slug| {
            direct.contains(slug) || (inherited && *slug == org_administer)
        })
    });

    Ok(granted)
}

/// Like [`check`], but a denial is an error.
///
/// # Errors
/// Returns [`ServiceError::PermissionDenied`] when the check fails.
pub async fn require(
    store: &dyn Store,
    principal: &Principal,
    permission: &str,
    resource: &Resource,
) -> Result<(), ServiceError> {
    if check(store, principal, permission, resource).await? {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied)
    }
}

/// The user plus every group the user holds a policy on.
async fn subjects(store: &dyn Store, principal: &Principal) -> Result<Vec<Resource>, ServiceError> {
    let user = principal.subject();
    let memberships = store
        .fetch_policies(&PolicyFilter {
            principals: vec![user.clone()],
            ..PolicyFilter::default()
        })
        .await?;

    let mut subjects = vec![user];
    for policy in memberships {
        if policy.resource.namespace == GROUP_NAMESPACE {
            let group = Resource::new(GROUP_PRINCIPAL, policy.resource.id);
            if !subjects.contains(&group) {
                subjects.push(group);
            }
        }
    }
    Ok(subjects)
}

/// The owning organization of a project or group.
async fn parent_org(store: &dyn Store, resource: &Resource) -> Result<Option<Resource>, ServiceError> {
    let Ok(id) = Uuid::parse_str(&resource.id) else {
        return Ok(None);
    };
    let org_id = match resource.namespace.as_str() {
        PROJECT_NAMESPACE => store.fetch_project(id).await?.map(|project| project.org_id),
        GROUP_NAMESPACE => store.fetch_group(id).await?.map(|group| group.org_id),
        _ => None,
    };
    Ok(org_id.map(|org_id| Resource::new(ORGANIZATION_NAMESPACE, org_id.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authz::schema::{
            GET_PERMISSION, ROLE_GROUP_MEMBER, ROLE_ORGANIZATION_OWNER, ROLE_PROJECT_VIEWER,
            UPDATE_PERMISSION,
        },
        domain::{
            Metadata, State,
            group::Group,
            organization::Organization,
            policy::Policy,
            project::Project,
            testing::{principal, seeded_store},
        },
    };
    use chrono::Utc;

    async fn org_with_owner(store: &dyn Store, owner: &Principal) -> Organization {
        let now = Utc::now();
        let org = Organization {
            id: Uuid::new_v4(),
            name: format!("org-{}", Uuid::new_v4().simple()),
            title: "Acme".to_string(),
            avatar: String::new(),
            metadata: Metadata::new(),
            state: State::Enabled,
            created_at: now,
            updated_at: now,
        };
        let role = store
            .fetch_role_by_name(None, ROLE_ORGANIZATION_OWNER)
            .await
            .unwrap()
            .unwrap();
        let policy = Policy::new(
            role.id,
            Resource::new(ORGANIZATION_NAMESPACE, org.id.to_string()),
            owner.subject(),
        );
        store.insert_org(&org, &policy).await.unwrap();
        org
    }

    async fn project_in(store: &dyn Store, org: &Organization) -> Project {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name: "web".to_string(),
            title: "Web".to_string(),
            org_id: org.id,
            metadata: Metadata::new(),
            state: State::Enabled,
            created_at: now,
            updated_at: now,
        };
        store.insert_project(&project).await.unwrap();
        project
    }

    async fn bind(store: &dyn Store, role: &str, resource: Resource, subject: Resource) {
        let role = store.fetch_role_by_name(None, role).await.unwrap().unwrap();
        store
            .insert_policy(&Policy::new(role.id, resource, subject))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn org_owner_reaches_every_project() {
        let store = seeded_store().await;
        let owner = principal(store.as_ref(), "owner", false).await;
        let org = org_with_owner(store.as_ref(), &owner).await;
        let project = project_in(store.as_ref(), &org).await;
        let resource = Resource::new(PROJECT_NAMESPACE, project.id.to_string());

        for permission in [GET_PERMISSION, UPDATE_PERMISSION, "delete"] {
            assert!(check(store.as_ref(), &owner, permission, &resource).await.unwrap());
        }
    }

    #[tokio::test]
    async fn project_viewer_can_get_but_not_update() {
        let store = seeded_store().await;
        let owner = principal(store.as_ref(), "owner", false).await;
        let viewer = principal(store.as_ref(), "viewer", false).await;
        let org = org_with_owner(store.as_ref(), &owner).await;
        let project = project_in(store.as_ref(), &org).await;
        let resource = Resource::new(PROJECT_NAMESPACE, project.id.to_string());
        bind(store.as_ref(), ROLE_PROJECT_VIEWER, resource.clone(), viewer.subject()).await;

        assert!(check(store.as_ref(), &viewer, GET_PERMISSION, &resource).await.unwrap());
        assert!(!check(store.as_ref(), &viewer, UPDATE_PERMISSION, &resource).await.unwrap());
        let org_resource = Resource::new(ORGANIZATION_NAMESPACE, org.id.to_string());
        assert!(!check(store.as_ref(), &viewer, GET_PERMISSION, &org_resource).await.unwrap());
    }

    #[tokio::test]
    async fn superuser_is_always_allowed() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;
        let resource = Resource::new(PROJECT_NAMESPACE, Uuid::new_v4().to_string());
        assert!(check(store.as_ref(), &admin, "delete", &resource).await.unwrap());
    }

    #[tokio::test]
    async fn group_policies_apply_to_members() {
        let store = seeded_store().await;
        let owner = principal(store.as_ref(), "owner", false).await;
        let member = principal(store.as_ref(), "member", false).await;
        let org = org_with_owner(store.as_ref(), &owner).await;
        let project = project_in(store.as_ref(), &org).await;

        let now = Utc::now();
        let group = Group {
            id: Uuid::new_v4(),
            name: "eng".to_string(),
            title: "Engineering".to_string(),
            org_id: org.id,
            metadata: Metadata::new(),
            state: State::Enabled,
            created_at: now,
            updated_at: now,
        };
        let member_role = store
            .fetch_role_by_name(None, ROLE_GROUP_MEMBER)
            .await
            .unwrap()
            .unwrap();
        let group_resource = Resource::new(GROUP_NAMESPACE, group.id.to_string());
        store
            .insert_group(
                &group,
                &Policy::new(member_role.id, group_resource, member.subject()),
            )
            .await
            .unwrap();

        let resource = Resource::new(PROJECT_NAMESPACE, project.id.to_string());
        assert!(!check(store.as_ref(), &member, GET_PERMISSION, &resource).await.unwrap());

        bind(
            store.as_ref(),
            ROLE_PROJECT_VIEWER,
            resource.clone(),
            Resource::new(GROUP_PRINCIPAL, group.id.to_string()),
        )
        .await;
        assert!(check(store.as_ref(), &member, GET_PERMISSION, &resource).await.unwrap());
    }

    #[tokio::test]
    async fn membership_requires_a_policy_on_the_org() {
        let store = seeded_store().await;
        let owner = principal(store.as_ref(), "owner", false).await;
        let stranger = principal(store.as_ref(), "stranger", false).await;
        let org = org_with_owner(store.as_ref(), &owner).await;
        let resource = Resource::new(ORGANIZATION_NAMESPACE, org.id.to_string());

        assert!(check(store.as_ref(), &owner, MEMBERSHIP_PERMISSION, &resource).await.unwrap());
        assert!(!check(store.as_ref(), &stranger, MEMBERSHIP_PERMISSION, &resource).await.unwrap());
        assert!(matches!(
            require(store.as_ref(), &stranger, GET_PERMISSION, &resource).await,
            Err(ServiceError::PermissionDenied)
        ));
    }
}
