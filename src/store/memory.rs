//! In-memory [`Store`] behind a `tokio` `RwLock`.
//!
//! Backs the `memory://` DSN and the service tests. Uniqueness rules mirror
//! the constraints in `sql/schema.sql` so conflicts surface the same way.

use super::{MemberRemoval, Store, StoreError};
use crate::{
    authz::{Resource, schema::{GROUP_NAMESPACE, GROUP_PRINCIPAL, ORGANIZATION_NAMESPACE, PROJECT_NAMESPACE, USER_PRINCIPAL}},
    billing::plan::{Plan, Product},
    domain::{
        audit::AuditRecord,
        group::Group,
        organization::Organization,
        permission::Permission,
        policy::{Policy, PolicyFilter},
        preference::Preference,
        project::Project,
        role::Role,
        user::User,
    },
    rql::{Compiled, Page, memory::apply},
};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    orgs: Vec<Organization>,
    projects: Vec<Project>,
    groups: Vec<Group>,
    permissions: Vec<Permission>,
    roles: Vec<Role>,
    policies: Vec<Policy>,
    preferences: Vec<Preference>,
    /// Plans are stored without products; `plan_products` links them.
    plans: Vec<Plan>,
    products: Vec<Product>,
    plan_products: Vec<(Uuid, Uuid)>,
    audit_records: Vec<AuditRecord>,
}

impl Tables {
    fn assemble(&self, plan: &Plan) -> Plan {
        let mut plan = plan.clone();
        plan.products = self
            .plan_products
            .iter()
            .filter(|(plan_id, _)| *plan_id == plan.id)
            .filter_map(|(_, product_id)| {
                self.products.iter().find(|product| product.id == *product_id)
            })
            .cloned()
            .collect();
        plan
    }

    fn remove_policies(&mut self, mut doomed: impl FnMut(&Policy) -> bool) -> u64 {
        let before = self.policies.len();
        self.policies.retain(|policy| !doomed(policy));
        (before - self.policies.len()) as u64
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflict(what: &str) -> StoreError {
    StoreError::Conflict(format!("{what} already exists"))
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .iter()
            .any(|other| other.email == user.email || other.name == user.name)
        {
            return Err(conflict("user"));
        }
        tables.users.push(user.clone());
        Ok(())
    }

    async fn fetch_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|user| user.id == id).cloned())
    }

    async fn fetch_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|user| user.name == name).cloned())
    }

    async fn fetch_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|user| user.email == email).cloned())
    }

    async fn fetch_users(&self, ids: &[Uuid]) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .filter(|user| ids.contains(&user.id))
            .cloned()
            .collect())
    }

    async fn search_users(&self, query: &Compiled) -> Result<Page<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(apply(tables.users.clone(), query))
    }

    async fn update_user(&self, user: &User) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(match tables.users.iter_mut().find(|other| other.id == user.id) {
            Some(stored) => {
                *stored = user.clone();
                true
            }
            None => false,
        })
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.users.len();
        tables.users.retain(|user| user.id != id);
        if tables.users.len() == before {
            return Ok(false);
        }
        let subject = Resource::new(USER_PRINCIPAL, id.to_string());
        tables.remove_policies(|policy| policy.principal == subject);
        let id = id.to_string();
        tables
            .preferences
            .retain(|pref| !(pref.resource_type == USER_PRINCIPAL && pref.resource_id == id));
        Ok(true)
    }

    async fn insert_org(&self, org: &Organization, owner: &Policy) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.orgs.iter().any(|other| other.name == org.name) {
            return Err(conflict("organization"));
        }
        tables.orgs.push(org.clone());
        tables.policies.push(owner.clone());
        Ok(())
    }

    async fn fetch_org(&self, id: Uuid) -> Result<Option<Organization>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.orgs.iter().find(|org| org.id == id).cloned())
    }

    async fn fetch_org_by_name(&self, name: &str) -> Result<Option<Organization>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.orgs.iter().find(|org| org.name == name).cloned())
    }

    async fn fetch_orgs(&self, ids: &[Uuid]) -> Result<Vec<Organization>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .orgs
            .iter()
            .filter(|org| ids.contains(&org.id))
            .cloned()
            .collect())
    }

    async fn search_orgs(&self, query: &Compiled) -> Result<Page<Organization>, StoreError> {
        let tables = self.tables.read().await;
        Ok(apply(tables.orgs.clone(), query))
    }

    async fn update_org(&self, org: &Organization) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(match tables.orgs.iter_mut().find(|other| other.id == org.id) {
            Some(stored) => {
                *stored = org.clone();
                true
            }
            None => false,
        })
    }

    async fn delete_org(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.orgs.len();
        tables.orgs.retain(|org| org.id != id);
        if tables.orgs.len() == before {
            return Ok(false);
        }

        let mut resources = vec![Resource::new(ORGANIZATION_NAMESPACE, id.to_string())];
        resources.extend(
            tables
                .projects
                .iter()
                .filter(|project| project.org_id == id)
                .map(|project| Resource::new(PROJECT_NAMESPACE, project.id.to_string())),
        );
        let groups: Vec<Resource> = tables
            .groups
            .iter()
            .filter(|group| group.org_id == id)
            .map(|group| Resource::new(GROUP_NAMESPACE, group.id.to_string()))
            .collect();
        resources.extend(groups.iter().cloned());

        tables.remove_policies(|policy| {
            resources.contains(&policy.resource) || groups.contains(&policy.principal)
        });
        tables.projects.retain(|project| project.org_id != id);
        tables.groups.retain(|group| group.org_id != id);
        tables.roles.retain(|role| role.org_id != Some(id));
        let id = id.to_string();
        tables.preferences.retain(|pref| {
            !(pref.resource_type == ORGANIZATION_NAMESPACE && pref.resource_id == id)
        });
        Ok(true)
    }

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .projects
            .iter()
            .any(|other| other.org_id == project.org_id && other.name == project.name)
        {
            return Err(conflict("project"));
        }
        tables.projects.push(project.clone());
        Ok(())
    }

    async fn fetch_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.projects.iter().find(|project| project.id == id).cloned())
    }

    async fn fetch_projects(&self, org_id: Uuid) -> Result<Vec<Project>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .projects
            .iter()
            .filter(|project| project.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn update_project(&self, project: &Project) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(
            match tables.projects.iter_mut().find(|other| other.id == project.id) {
                Some(stored) => {
                    *stored = project.clone();
                    true
                }
                None => false,
            },
        )
    }

    async fn delete_project(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.projects.len();
        tables.projects.retain(|project| project.id != id);
        if tables.projects.len() == before {
            return Ok(false);
        }
        let resource = Resource::new(PROJECT_NAMESPACE, id.to_string());
        tables.remove_policies(|policy| policy.resource == resource);
        Ok(true)
    }

    async fn insert_group(&self, group: &Group, owner: &Policy) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .groups
            .iter()
            .any(|other| other.org_id == group.org_id && other.name == group.name)
        {
            return Err(conflict("group"));
        }
        tables.groups.push(group.clone());
        tables.policies.push(owner.clone());
        Ok(())
    }

    async fn fetch_group(&self, id: Uuid) -> Result<Option<Group>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.groups.iter().find(|group| group.id == id).cloned())
    }

    async fn fetch_groups(&self, org_id: Uuid) -> Result<Vec<Group>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .iter()
            .filter(|group| group.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn delete_group(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.groups.len();
        tables.groups.retain(|group| group.id != id);
        if tables.groups.len() == before {
            return Ok(false);
        }
        let resource = Resource::new(GROUP_NAMESPACE, id.to_string());
        let principal = Resource::new(GROUP_PRINCIPAL, id.to_string());
        tables.remove_policies(|policy| policy.resource == resource || policy.principal == principal);
        Ok(true)
    }

    async fn upsert_permission(&self, permission: &Permission) -> Result<Permission, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(stored) = tables
            .permissions
            .iter_mut()
            .find(|other| other.slug == permission.slug)
        {
            stored.metadata = permission.metadata.clone();
            stored.updated_at = permission.updated_at;
            return Ok(stored.clone());
        }
        tables.permissions.push(permission.clone());
        Ok(permission.clone())
    }

    async fn fetch_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        Ok(self.tables.read().await.permissions.clone())
    }

    async fn upsert_role(&self, role: &Role) -> Result<Role, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(stored) = tables
            .roles
            .iter_mut()
            .find(|other| other.org_id == role.org_id && other.name == role.name)
        {
            stored.title = role.title.clone();
            stored.permissions = role.permissions.clone();
            stored.scopes = role.scopes.clone();
            stored.state = role.state;
            stored.metadata = role.metadata.clone();
            stored.updated_at = role.updated_at;
            return Ok(stored.clone());
        }
        tables.roles.push(role.clone());
        Ok(role.clone())
    }

    async fn fetch_role(&self, id: Uuid) -> Result<Option<Role>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.roles.iter().find(|role| role.id == id).cloned())
    }

    async fn fetch_role_by_name(
        &self,
        org_id: Option<Uuid>,
        name: &str,
    ) -> Result<Option<Role>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .roles
            .iter()
            .find(|role| role.org_id == org_id && role.name == name)
            .cloned())
    }

    async fn fetch_roles(&self, org_id: Option<Uuid>) -> Result<Vec<Role>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .roles
            .iter()
            .filter(|role| role.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn fetch_roles_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .roles
            .iter()
            .filter(|role| ids.contains(&role.id))
            .cloned()
            .collect())
    }

    async fn insert_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.policies.iter().any(|other| {
            other.role_id == policy.role_id
                && other.resource == policy.resource
                && other.principal == policy.principal
        }) {
            return Err(conflict("policy"));
        }
        tables.policies.push(policy.clone());
        Ok(())
    }

    async fn fetch_policy(&self, id: Uuid) -> Result<Option<Policy>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.policies.iter().find(|policy| policy.id == id).cloned())
    }

    async fn fetch_policies(&self, filter: &PolicyFilter) -> Result<Vec<Policy>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .policies
            .iter()
            .filter(|policy| filter.matches(policy))
            .cloned()
            .collect())
    }

    async fn delete_policy(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.remove_policies(|policy| policy.id == id) > 0)
    }

    async fn delete_policies(&self, filter: &PolicyFilter) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.remove_policies(|policy| filter.matches(policy)))
    }

    async fn remove_org_member(
        &self,
        org_id: Uuid,
        member: &Resource,
        owner_role: Uuid,
    ) -> Result<MemberRemoval, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.orgs.iter().any(|org| org.id == org_id) {
            return Ok(MemberRemoval::NotMember);
        }
        let org = Resource::new(ORGANIZATION_NAMESPACE, org_id.to_string());
        let on_org = tables
            .policies
            .iter()
            .filter(|policy| policy.resource == org)
            .map(|policy| (&policy.principal, policy.role_id));
        if let Some(rejected) = MemberRemoval::check(on_org, member, owner_role) {
            return Ok(rejected);
        }

        let mut resources = vec![org];
        resources.extend(
            tables
                .projects
                .iter()
                .filter(|project| project.org_id == org_id)
                .map(|project| Resource::new(PROJECT_NAMESPACE, project.id.to_string())),
        );
        resources.extend(
            tables
                .groups
                .iter()
                .filter(|group| group.org_id == org_id)
                .map(|group| Resource::new(GROUP_NAMESPACE, group.id.to_string())),
        );
        let removed = tables.remove_policies(|policy| {
            policy.principal == *member && resources.contains(&policy.resource)
        });
        Ok(MemberRemoval::Removed(removed))
    }

    async fn upsert_preference(&self, preference: &Preference) -> Result<Preference, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(stored) = tables.preferences.iter_mut().find(|other| {
            other.resource_type == preference.resource_type
                && other.resource_id == preference.resource_id
                && other.name == preference.name
        }) {
            stored.value = preference.value.clone();
            stored.updated_at = preference.updated_at;
            return Ok(stored.clone());
        }
        tables.preferences.push(preference.clone());
        Ok(preference.clone())
    }

    async fn fetch_preferences(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<Preference>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .preferences
            .iter()
            .filter(|pref| pref.resource_type == resource_type && pref.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn upsert_plan(&self, plan: &Plan) -> Result<Plan, StoreError> {
        let mut tables = self.tables.write().await;

        let mut product_ids = Vec::with_capacity(plan.products.len());
        for product in &plan.products {
            let mut incoming = product.clone();
            if let Some(stored) = tables
                .products
                .iter_mut()
                .find(|other| other.name == product.name)
            {
                incoming.id = stored.id;
                incoming.created_at = stored.created_at;
                for price in &mut incoming.prices {
                    price.product_id = stored.id;
                }
                *stored = incoming;
                product_ids.push(stored.id);
            } else {
                product_ids.push(incoming.id);
                tables.products.push(incoming);
            }
        }

        let mut incoming = plan.clone();
        incoming.products = Vec::new();
        let plan_id = match tables.plans.iter_mut().find(|other| other.name == plan.name) {
            Some(stored) => {
                incoming.id = stored.id;
                incoming.created_at = stored.created_at;
                *stored = incoming.clone();
                stored.id
            }
            None => {
                tables.plans.push(incoming.clone());
                incoming.id
            }
        };

        tables.plan_products.retain(|(linked, _)| *linked != plan_id);
        tables
            .plan_products
            .extend(product_ids.into_iter().map(|product_id| (plan_id, product_id)));
        Ok(tables.assemble(&incoming))
    }

    async fn fetch_plan(&self, id: Uuid) -> Result<Option<Plan>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .plans
            .iter()
            .find(|plan| plan.id == id)
            .map(|plan| tables.assemble(plan)))
    }

    async fn fetch_plan_by_name(&self, name: &str) -> Result<Option<Plan>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .plans
            .iter()
            .find(|plan| plan.name == name)
            .map(|plan| tables.assemble(plan)))
    }

    async fn fetch_plans(&self) -> Result<Vec<Plan>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.plans.iter().map(|plan| tables.assemble(plan)).collect())
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.tables.read().await.products.clone())
    }

    async fn insert_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if record.idempotency_key.is_some()
            && tables
                .audit_records
                .iter()
                .any(|other| other.idempotency_key == record.idempotency_key)
        {
            return Err(conflict("audit record"));
        }
        tables.audit_records.push(record.clone());
        Ok(())
    }

    async fn fetch_audit_record_by_key(
        &self,
        key: &str,
    ) -> Result<Option<AuditRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .audit_records
            .iter()
            .find(|record| record.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn search_audit_records(
        &self,
        query: &Compiled,
    ) -> Result<Page<AuditRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(apply(tables.audit_records.clone(), query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metadata, State};
    use chrono::Utc;

    fn user(name: &str, email: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            title: String::new(),
            avatar: String::new(),
            metadata: Metadata::new(),
            state: State::Enabled,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn unique_user_fields_conflict() {
        let store = MemoryStore::new();
        store.insert_user(&user("alice", "alice@acme.test")).await.unwrap();
        assert!(matches!(
            store.insert_user(&user("alice", "other@acme.test")).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.insert_user(&user("other", "alice@acme.test")).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn deleting_a_user_drops_their_policies() {
        let store = MemoryStore::new();
        let alice = user("alice", "alice@acme.test");
        store.insert_user(&alice).await.unwrap();
        let subject = Resource::new(USER_PRINCIPAL, alice.id.to_string());
        store
            .insert_policy(&Policy::new(
                Uuid::new_v4(),
                Resource::new(ORGANIZATION_NAMESPACE, Uuid::new_v4().to_string()),
                subject.clone(),
            ))
            .await
            .unwrap();

        assert!(store.delete_user(alice.id).await.unwrap());
        let left = store
            .fetch_policies(&PolicyFilter {
                principals: vec![subject],
                ..PolicyFilter::default()
            })
            .await
            .unwrap();
        assert!(left.is_empty());
        assert!(!store.delete_user(alice.id).await.unwrap());
    }

    #[tokio::test]
    async fn member_removal_keeps_the_last_owner() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let org = Organization {
            id: Uuid::new_v4(),
            name: "acme".to_string(),
            title: String::new(),
            avatar: String::new(),
            metadata: Metadata::new(),
            state: State::Enabled,
            created_at: now,
            updated_at: now,
        };
        let owner_role = Uuid::new_v4();
        let alice = Resource::new(USER_PRINCIPAL, Uuid::new_v4().to_string());
        let bob = Resource::new(USER_PRINCIPAL, Uuid::new_v4().to_string());
        store
            .insert_org(&org, &Policy::new(owner_role, org.resource(), alice.clone()))
            .await
            .unwrap();
        let project = Project {
            id: Uuid::new_v4(),
            name: "web".to_string(),
            title: String::new(),
            org_id: org.id,
            metadata: Metadata::new(),
            state: State::Enabled,
            created_at: now,
            updated_at: now,
        };
        store.insert_project(&project).await.unwrap();
        let elsewhere = Resource::new(PROJECT_NAMESPACE, Uuid::new_v4().to_string());
        for policy in [
            Policy::new(Uuid::new_v4(), org.resource(), bob.clone()),
            Policy::new(Uuid::new_v4(), project.resource(), bob.clone()),
            Policy::new(Uuid::new_v4(), elsewhere.clone(), bob.clone()),
        ] {
            store.insert_policy(&policy).await.unwrap();
        }

        assert_eq!(
            store.remove_org_member(org.id, &alice, owner_role).await.unwrap(),
            MemberRemoval::LastOwner
        );
        assert_eq!(
            store.remove_org_member(Uuid::new_v4(), &bob, owner_role).await.unwrap(),
            MemberRemoval::NotMember
        );
        assert_eq!(
            store.remove_org_member(org.id, &bob, owner_role).await.unwrap(),
            MemberRemoval::Removed(2)
        );
        assert_eq!(
            store.remove_org_member(org.id, &bob, owner_role).await.unwrap(),
            MemberRemoval::NotMember
        );
        let left = store
            .fetch_policies(&PolicyFilter {
                principals: vec![bob],
                ..PolicyFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].resource, elsewhere);
    }
}
