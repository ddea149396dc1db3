//! Seeds the base permissions and predefined platform roles.
//!
//! Runs on every start. Permissions upsert by slug and roles by name, so a
//! second run leaves ids untouched.

use super::{Metadata, ServiceError, permission::Permission, role::Role};
use crate::{
    authz::schema::{BASE_PERMISSIONS, PREDEFINED_ROLES},
    store::Store,
};
use tracing::info;

/// # Errors
/// Returns a store error if a permission or role cannot be written.
pub async fn run(store: &dyn Store) -> Result<(), ServiceError> {
    let mut permissions = 0;
    for (namespace, verbs) in BASE_PERMISSIONS {
        for verb in *verbs {
            store
                .upsert_permission(&Permission::new(namespace, verb, Metadata::new())?)
                .await?;
            permissions += 1;
        }
    }

    for definition in PREDEFINED_ROLES {
        let role = Role::new(
            None,
            definition.name,
            definition.title,
            definition.permissions.iter().map(ToString::to_string).collect(),
            definition.scopes.iter().map(ToString::to_string).collect(),
        );
        store.upsert_role(&role).await?;
    }

    info!(
        permissions,
        roles = PREDEFINED_ROLES.len(),
        "bootstrapped permissions and roles"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use uuid::Uuid;

    async fn snapshot(store: &MemoryStore) -> (Vec<(Uuid, String)>, Vec<(Uuid, String)>) {
        let mut permissions: Vec<_> = store
            .fetch_permissions()
            .await
            .unwrap()
            .into_iter()
            .map(|permission| (permission.id, permission.slug))
            .collect();
        let mut roles: Vec<_> = store
            .fetch_roles(None)
            .await
            .unwrap()
            .into_iter()
            .map(|role| (role.id, role.name))
            .collect();
        permissions.sort();
        roles.sort();
        (permissions, roles)
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = MemoryStore::new();
        run(&store).await.unwrap();
        let first = snapshot(&store).await;

        run(&store).await.unwrap();
        assert_eq!(snapshot(&store).await, first);
        assert_eq!(first.1.len(), PREDEFINED_ROLES.len());
    }

    #[tokio::test]
    async fn every_predefined_permission_is_seeded() {
        let store = MemoryStore::new();
        run(&store).await.unwrap();
        let slugs: Vec<String> = store
            .fetch_permissions()
            .await
            .unwrap()
            .into_iter()
            .map(|permission| permission.slug)
            .collect();
        for role in PREDEFINED_ROLES {
            for permission in role.permissions {
                assert!(slugs.iter().any(|slug| slug == permission), "{permission}");
            }
        }
    }
}
