//! Permission catalogue: base verbs of the system namespaces plus custom
//! permissions registered by key.

use super::{Metadata, ServiceError};
use crate::{
    authz::{
        Principal,
        schema::{
            is_system_namespace, is_valid_permission_name, namespace_and_name_from_key,
            permission_key, permission_slug,
        },
    },
    store::Store,
};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    pub name: String,
    /// `service/resource`
    pub namespace: String,
    /// `service_resource_name`, referenced by roles.
    pub slug: String,
    /// `service.resource.name`
    pub key: String,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    /// Builds a permission for `name` in `namespace`.
    ///
    /// # Errors
    /// `InvalidArgument` unless the name is alphanumeric.
    pub fn new(namespace: &str, name: &str, metadata: Metadata) -> Result<Self, ServiceError> {
        if !is_valid_permission_name(name) {
            return Err(ServiceError::invalid(format!(
                "permission name {name:?} must be alphanumeric"
            )));
        }
        let now = Utc::now().trunc_subsecs(6);
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            slug: permission_slug(namespace, name),
            key: permission_key(namespace, name),
            metadata,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionBody {
    /// `service.resource.verb`
    pub key: String,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePermissionsRequest {
    pub bodies: Vec<PermissionBody>,
}

/// # Errors
/// Returns a store error if the catalogue cannot be loaded.
pub async fn list(store: &dyn Store) -> Result<Vec<Permission>, ServiceError> {
    Ok(store.fetch_permissions().await?)
}

/// Registers custom permissions by key. Superuser only.
///
/// # Errors
/// `PermissionDenied` for non-superusers, `InvalidArgument` for malformed keys,
/// bad names or keys inside a system namespace.
pub async fn register(
    store: &dyn Store,
    principal: &Principal,
    bodies: Vec<PermissionBody>,
) -> Result<Vec<Permission>, ServiceError> {
    if !principal.superuser {
        return Err(ServiceError::PermissionDenied);
    }

    let mut permissions = Vec::with_capacity(bodies.len());
    for body in bodies {
        let (namespace, name) = namespace_and_name_from_key(&body.key).ok_or_else(|| {
            ServiceError::invalid(format!(
                "permission key {:?} must be service.resource.verb",
                body.key
            ))
        })?;
        if is_system_namespace(&namespace) {
            return Err(ServiceError::invalid(format!(
                "namespace {namespace} is reserved"
            )));
        }
        permissions.push(Permission::new(
            &namespace,
            &name,
            body.metadata.unwrap_or_default(),
        )?);
    }

    let mut stored = Vec::with_capacity(permissions.len());
    for permission in permissions {
        stored.push(store.upsert_permission(&permission).await?);
    }
    info!(count = stored.len(), "permissions registered");
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::testing::{principal, seeded_store};

    fn body(key: &str) -> PermissionBody {
        PermissionBody {
            key: key.to_string(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn superusers_register_custom_permissions() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;
        let before = list(store.as_ref()).await.unwrap().len();

        let stored = register(store.as_ref(), &admin, vec![body("compute.instance.start")])
            .await
            .unwrap();
        assert_eq!(stored[0].slug, "compute_instance_start");
        assert_eq!(stored[0].namespace, "compute/instance");

        // registering the same key again updates in place
        register(store.as_ref(), &admin, vec![body("compute.instance.start")])
            .await
            .unwrap();
        assert_eq!(list(store.as_ref()).await.unwrap().len(), before + 1);
    }

    #[tokio::test]
    async fn rejects_bad_keys_and_non_superusers() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;
        let alice = principal(store.as_ref(), "alice", false).await;

        for key in ["compute.start", "compute.instance.re-start", "app.project.nuke"] {
            let err = register(store.as_ref(), &admin, vec![body(key)])
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidArgument(_)), "{key}");
        }
        assert!(matches!(
            register(store.as_ref(), &alice, vec![body("compute.instance.start")]).await,
            Err(ServiceError::PermissionDenied)
        ));
    }
}
