//! Persistence behind one async trait.
//!
//! `PgStore` is the production backend; `MemoryStore` keeps everything in a
//! `tokio` `RwLock` and backs the `memory://` DSN and the test suite. Lookups
//! return `Ok(None)` when a row is missing and mutations report whether a row
//! was touched, so the service layer decides which entity was not found.

pub mod memory;
pub mod postgres;

use crate::{
    billing::plan::{Plan, Product},
    domain::{
        audit::AuditRecord, group::Group, organization::Organization, permission::Permission,
        policy::{Policy, PolicyFilter},
        preference::Preference, project::Project, role::Role, user::User,
    },
    authz::Resource,
    rql::{Compiled, Page, RqlError},
};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Rql(#[from] RqlError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of [`Store::remove_org_member`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRemoval {
    /// Policies deleted across the organization, its projects and groups.
    Removed(u64),
    NotMember,
    LastOwner,
}

impl MemberRemoval {
    /// Rejects the removal given the `(principal, role)` pairs held on the
    /// organization itself, or `None` when it may proceed.
    pub(crate) fn check<'a>(
        on_org: impl IntoIterator<Item = (&'a Resource, Uuid)>,
        member: &Resource,
        owner_role: Uuid,
    ) -> Option<Self> {
        let mut present = false;
        let mut other_owner = false;
        let mut member_owns = false;
        for (principal, role_id) in on_org {
            let is_member = principal == member;
            present |= is_member;
            if role_id == owner_role {
                if is_member {
                    member_owns = true;
                } else {
                    other_owner = true;
                }
            }
        }
        if !present {
            Some(Self::NotMember)
        } else if member_owns && !other_owner {
            Some(Self::LastOwner)
        } else {
            None
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn fetch_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn fetch_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError>;
    async fn fetch_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn fetch_users(&self, ids: &[Uuid]) -> Result<Vec<User>, StoreError>;
    async fn search_users(&self, query: &Compiled) -> Result<Page<User>, StoreError>;
    async fn update_user(&self, user: &User) -> Result<bool, StoreError>;
    /// Removes the user together with every policy that names the user.
    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Inserts the organization and its owner policy in one transaction.
    async fn insert_org(&self, org: &Organization, owner: &Policy) -> Result<(), StoreError>;
    async fn fetch_org(&self, id: Uuid) -> Result<Option<Organization>, StoreError>;
    async fn fetch_org_by_name(&self, name: &str) -> Result<Option<Organization>, StoreError>;
    async fn fetch_orgs(&self, ids: &[Uuid]) -> Result<Vec<Organization>, StoreError>;
    async fn search_orgs(&self, query: &Compiled) -> Result<Page<Organization>, StoreError>;
    async fn update_org(&self, org: &Organization) -> Result<bool, StoreError>;
    /// Cascades to projects, groups, preferences and every policy on them.
    async fn delete_org(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError>;
    async fn fetch_project(&self, id: Uuid) -> Result<Option<Project>, StoreError>;
    async fn fetch_projects(&self, org_id: Uuid) -> Result<Vec<Project>, StoreError>;
    async fn update_project(&self, project: &Project) -> Result<bool, StoreError>;
    async fn delete_project(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Inserts the group and its owner policy in one transaction.
    async fn insert_group(&self, group: &Group, owner: &Policy) -> Result<(), StoreError>;
    async fn fetch_group(&self, id: Uuid) -> Result<Option<Group>, StoreError>;
    async fn fetch_groups(&self, org_id: Uuid) -> Result<Vec<Group>, StoreError>;
    async fn delete_group(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Inserts or updates by slug; returns the stored row.
    async fn upsert_permission(&self, permission: &Permission) -> Result<Permission, StoreError>;
    async fn fetch_permissions(&self) -> Result<Vec<Permission>, StoreError>;

    /// Inserts or updates by `(org_id, name)`; returns the stored row.
    async fn upsert_role(&self, role: &Role) -> Result<Role, StoreError>;
    async fn fetch_role(&self, id: Uuid) -> Result<Option<Role>, StoreError>;
    async fn fetch_role_by_name(
        &self,
        org_id: Option<Uuid>,
        name: &str,
    ) -> Result<Option<Role>, StoreError>;
    /// Platform roles for `None`, otherwise the roles of that organization.
    async fn fetch_roles(&self, org_id: Option<Uuid>) -> Result<Vec<Role>, StoreError>;
    async fn fetch_roles_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>, StoreError>;

    async fn insert_policy(&self, policy: &Policy) -> Result<(), StoreError>;
    async fn fetch_policy(&self, id: Uuid) -> Result<Option<Policy>, StoreError>;
    async fn fetch_policies(&self, filter: &PolicyFilter) -> Result<Vec<Policy>, StoreError>;
    async fn delete_policy(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn delete_policies(&self, filter: &PolicyFilter) -> Result<u64, StoreError>;
    /// Checks membership and the last-owner rule, then deletes every policy
    /// the member holds on the organization, its projects and its groups, all
    /// in one transaction that locks the organization row.
    async fn remove_org_member(
        &self,
        org_id: Uuid,
        member: &Resource,
        owner_role: Uuid,
    ) -> Result<MemberRemoval, StoreError>;

    /// Inserts or updates by `(resource_type, resource_id, name)`.
    async fn upsert_preference(&self, preference: &Preference) -> Result<Preference, StoreError>;
    async fn fetch_preferences(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<Preference>, StoreError>;

    /// Upserts the plan by name and each product by name, replacing the
    /// products' prices and features. Returns the stored plan.
    async fn upsert_plan(&self, plan: &Plan) -> Result<Plan, StoreError>;
    async fn fetch_plan(&self, id: Uuid) -> Result<Option<Plan>, StoreError>;
    async fn fetch_plan_by_name(&self, name: &str) -> Result<Option<Plan>, StoreError>;
    async fn fetch_plans(&self) -> Result<Vec<Plan>, StoreError>;
    async fn fetch_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Fails with `Conflict` when the idempotency key is taken.
    async fn insert_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError>;
    async fn fetch_audit_record_by_key(&self, key: &str)
    -> Result<Option<AuditRecord>, StoreError>;
    async fn search_audit_records(&self, query: &Compiled)
    -> Result<Page<AuditRecord>, StoreError>;
}
