//! Users and principal resolution.
//!
//! A user is keyed by a unique slug `name` and a unique lowercased `email`. The
//! email is what the identity header carries, so principal resolution is an
//! email lookup; configured superusers get a user row on first sight.

use super::{
    Metadata, ServiceError, State, audit, non_empty,
    organization::Organization,
    preference::{self, DISABLE_USERS_LISTING},
    slug::{SLUG_MAX, SLUG_MIN, normalize_slug},
};
use crate::{
    authz::{Identity, Principal, schema::{ORGANIZATION_NAMESPACE, USER_PRINCIPAL}},
    domain::policy::PolicyFilter,
    rql::{DataType, Field, Page, RqlQuery, RqlSchema, Value, memory::RqlRecord},
    store::{Store, StoreError},
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

pub static USER_RQL_SCHEMA: RqlSchema = RqlSchema {
    table: "users",
    fields: &[
        Field::new("id", DataType::String),
        Field::new("name", DataType::String).searchable(),
        Field::new("email", DataType::String).searchable(),
        Field::new("title", DataType::String).searchable(),
        Field::new("state", DataType::String).groupable(),
        Field::new("created_at", DataType::Datetime),
        Field::new("updated_at", DataType::Datetime),
    ],
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub title: String,
    pub avatar: String,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub state: State,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RqlRecord for User {
    fn rql_value(&self, field: &str) -> Value {
        match field {
            "id" => Value::String(self.id.to_string()),
            "name" => Value::String(self.name.clone()),
            "email" => Value::String(self.email.clone()),
            "title" => Value::String(self.title.clone()),
            "state" => Value::String(self.state.to_string()),
            "created_at" => Value::Datetime(self.created_at),
            "updated_at" => Value::Datetime(self.updated_at),
            _ => Value::None,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub email: String,
    /// Defaults to a slug of the email.
    pub name: Option<String>,
    pub title: Option<String>,
    pub avatar: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    pub title: Option<String>,
    pub avatar: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

/// Lightweight email sanity check used before persisting users.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

fn new_user(email: String, name: String, request: CreateUserRequest) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        name,
        email,
        title: non_empty(request.title.as_deref())
            .unwrap_or_default()
            .to_string(),
        avatar: request.avatar.unwrap_or_default(),
        metadata: request.metadata.unwrap_or_default(),
        state: State::Enabled,
        created_at: now,
        updated_at: now,
    }
}

/// Resolves the identity header into a principal.
///
/// Superusers without a user row get one created; anyone else must already
/// exist and be enabled.
///
/// # Errors
/// `Unauthenticated` for unknown or disabled users.
pub async fn resolve_principal(
    store: &dyn Store,
    identity: &Identity,
) -> Result<Principal, ServiceError> {
    let user = match store.fetch_user_by_email(&identity.email).await? {
        Some(user) => user,
        None if identity.superuser => {
            let request = CreateUserRequest {
                email: identity.email.clone(),
                name: None,
                title: None,
                avatar: None,
                metadata: None,
            };
            let name = email_slug(&identity.email)?;
            let user = new_user(identity.email.clone(), name, request);
            match store.insert_user(&user).await {
                Ok(()) => user,
                // created concurrently by another request
                Err(StoreError::Conflict(_)) => store
                    .fetch_user_by_email(&identity.email)
                    .await?
                    .ok_or(ServiceError::Unauthenticated)?,
                Err(err) => return Err(err.into()),
            }
        }
        None => return Err(ServiceError::Unauthenticated),
    };

    if user.state == State::Disabled {
        return Err(ServiceError::Unauthenticated);
    }

    Ok(Principal {
        user,
        superuser: identity.superuser,
    })
}

fn email_slug(email: &str) -> Result<String, ServiceError> {
    normalize_slug(email, SLUG_MIN, SLUG_MAX).ok_or_else(|| ServiceError::invalid("invalid email"))
}

/// Creates a user. Callers other than superusers may only create themselves.
///
/// # Errors
/// `InvalidArgument` for a bad email or name, `PermissionDenied` when creating
/// someone else, `Conflict` when the email or name is taken.
#[instrument(skip(store, identity, request))]
pub async fn create(
    store: &dyn Store,
    identity: &Identity,
    request: CreateUserRequest,
) -> Result<User, ServiceError> {
    let email = request.email.trim().to_lowercase();
    if !valid_email(&email) {
        return Err(ServiceError::invalid("invalid email"));
    }
    if !identity.superuser && identity.email != email {
        return Err(ServiceError::PermissionDenied);
    }

    let name = match non_empty(request.name.as_deref()) {
        Some(name) => normalize_slug(name, SLUG_MIN, SLUG_MAX)
            .ok_or_else(|| ServiceError::invalid("invalid user name"))?,
        None => email_slug(&email)?,
    };

    let user = new_user(email, name, request);
    store.insert_user(&user).await.map_err(|err| match err {
        StoreError::Conflict(_) => ServiceError::conflict("user already exists"),
        err => err.into(),
    })?;

    info!(user_id = %user.id, "user created");
    if let Some(actor) = store.fetch_user_by_email(&identity.email).await? {
        let actor = Principal {
            user: actor,
            superuser: identity.superuser,
        };
        audit::emit(
            store,
            &actor,
            audit::EVENT_USER_CREATED,
            audit::AuditEntity::new(USER_PRINCIPAL, user.id, user.email.clone()),
            None,
            None,
        )
        .await;
    }
    Ok(user)
}

/// Looks up a user by id or by name.
///
/// # Errors
/// `NotFound` when no user matches.
pub async fn get(store: &dyn Store, id_or_name: &str) -> Result<User, ServiceError> {
    let user = match Uuid::parse_str(id_or_name) {
        Ok(id) => store.fetch_user(id).await?,
        Err(_) => store.fetch_user_by_name(id_or_name).await?,
    };
    user.ok_or(ServiceError::NotFound("user"))
}

/// Lists users with RQL. Restricted to superusers when `disable_users_listing` is on.
///
/// # Errors
/// `PermissionDenied` when listing is disabled, `InvalidArgument` for a bad query.
pub async fn list(
    store: &dyn Store,
    principal: &Principal,
    query: &RqlQuery,
) -> Result<Page<User>, ServiceError> {
    if !principal.superuser && preference::platform_flag(store, DISABLE_USERS_LISTING).await? {
        return Err(ServiceError::PermissionDenied);
    }
    let compiled = query.compile(&USER_RQL_SCHEMA)?;
    Ok(store.search_users(&compiled).await?)
}

/// Admin search over every user. Superuser only.
///
/// # Errors
/// `PermissionDenied` for non-superusers, `InvalidArgument` for a bad query.
pub async fn search(
    store: &dyn Store,
    principal: &Principal,
    query: &RqlQuery,
) -> Result<Page<User>, ServiceError> {
    if !principal.superuser {
        return Err(ServiceError::PermissionDenied);
    }
    let compiled = query.compile(&USER_RQL_SCHEMA)?;
    Ok(store.search_users(&compiled).await?)
}

fn require_self_or_superuser(principal: &Principal, id: Uuid) -> Result<(), ServiceError> {
    if principal.superuser || principal.id() == id {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied)
    }
}

/// Updates title, avatar and metadata of the caller, or of anyone for superusers.
///
/// # Errors
/// `PermissionDenied` for other users, `NotFound` for unknown ids.
pub async fn update(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    request: UpdateUserRequest,
) -> Result<User, ServiceError> {
    require_self_or_superuser(principal, id)?;
    let mut user = store
        .fetch_user(id)
        .await?
        .ok_or(ServiceError::NotFound("user"))?;

    if let Some(title) = request.title {
        user.title = title.trim().to_string();
    }
    if let Some(avatar) = request.avatar {
        user.avatar = avatar;
    }
    if let Some(metadata) = request.metadata {
        user.metadata = metadata;
    }
    user.updated_at = Utc::now();

    if !store.update_user(&user).await? {
        return Err(ServiceError::NotFound("user"));
    }
    audit::emit(
        store,
        principal,
        audit::EVENT_USER_UPDATED,
        audit::AuditEntity::new(USER_PRINCIPAL, user.id, user.email.clone()),
        None,
        None,
    )
    .await;
    Ok(user)
}

/// Enables or disables a user. Superuser only.
///
/// # Errors
/// `PermissionDenied` for non-superusers, `NotFound` for unknown ids.
pub async fn set_state(
    store: &dyn Store,
    principal: &Principal,
    id: Uuid,
    state: State,
) -> Result<User, ServiceError> {
    if !principal.superuser {
        return Err(ServiceError::PermissionDenied);
    }
    let mut user = store
        .fetch_user(id)
        .await?
        .ok_or(ServiceError::NotFound("user"))?;
    user.state = state;
    user.updated_at = Utc::now();
    if !store.update_user(&user).await? {
        return Err(ServiceError::NotFound("user"));
    }
    let event = match state {
        State::Enabled => audit::EVENT_USER_ENABLED,
        State::Disabled => audit::EVENT_USER_DISABLED,
    };
    audit::emit(
        store,
        principal,
        event,
        audit::AuditEntity::new(USER_PRINCIPAL, user.id, user.email.clone()),
        None,
        None,
    )
    .await;
    Ok(user)
}

/// Deletes a user and the user's policies. Superuser only.
///
/// # Errors
/// `PermissionDenied` for non-superusers, `NotFound` for unknown ids.
#[instrument(skip(store, principal))]
pub async fn delete(store: &dyn Store, principal: &Principal, id: Uuid) -> Result<(), ServiceError> {
    if !principal.superuser {
        return Err(ServiceError::PermissionDenied);
    }
    let user = store
        .fetch_user(id)
        .await?
        .ok_or(ServiceError::NotFound("user"))?;
    if !store.delete_user(id).await? {
        return Err(ServiceError::NotFound("user"));
    }
    audit::emit(
        store,
        principal,
        audit::EVENT_USER_DELETED,
        audit::AuditEntity::new(USER_PRINCIPAL, user.id, user.email),
        None,
        None,
    )
    .await;
    Ok(())
}

/// Organizations the caller holds any policy on.
///
/// # Errors
/// Returns a store error if policies or organizations cannot be loaded.
pub async fn organizations(
    store: &dyn Store,
    principal: &Principal,
) -> Result<Vec<Organization>, ServiceError> {
    let policies = store
        .fetch_policies(&PolicyFilter {
            principals: vec![principal.subject()],
            ..PolicyFilter::default()
        })
        .await?;
    let ids: Vec<Uuid> = policies
        .iter()
        .filter(|policy| policy.resource.namespace == ORGANIZATION_NAMESPACE)
        .filter_map(|policy| Uuid::parse_str(&policy.resource.id).ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    Ok(store.fetch_orgs(&ids).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        preference::{PreferenceInput, Scope},
        testing::{principal, seeded_store},
    };

    fn identity(email: &str, superuser: bool) -> Identity {
        Identity {
            email: email.to_string(),
            superuser,
        }
    }

    fn request(email: &str) -> CreateUserRequest {
        CreateUserRequest {
            email: email.to_string(),
            name: None,
            title: Some("  Alice  ".to_string()),
            avatar: None,
            metadata: None,
        }
    }

    #[test]
    fn valid_email_accepts_simple() {
        assert!(valid_email("user@example.com"));
        assert!(!valid_email("user.example.com"));
    }

    #[tokio::test]
    async fn users_may_only_create_themselves() {
        let store = seeded_store().await;
        let alice = identity("alice@acme.test", false);

        let user = create(store.as_ref(), &alice, request("Alice@Acme.test"))
            .await
            .unwrap();
        assert_eq!(user.email, "alice@acme.test");
        assert_eq!(user.name, "alice-acme-test");
        assert_eq!(user.title, "Alice");

        let err = create(store.as_ref(), &alice, request("bob@acme.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = seeded_store().await;
        let admin = identity("root@acme.test", true);
        create(store.as_ref(), &admin, request("carol@acme.test"))
            .await
            .unwrap();
        let err = create(store.as_ref(), &admin, request("carol@acme.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn superusers_are_provisioned_on_first_request() {
        let store = seeded_store().await;
        let admin = identity("root@acme.test", true);
        let principal = resolve_principal(store.as_ref(), &admin).await.unwrap();
        assert!(principal.superuser);
        assert_eq!(principal.user.email, "root@acme.test");

        let stranger = identity("nobody@acme.test", false);
        assert!(matches!(
            resolve_principal(store.as_ref(), &stranger).await,
            Err(ServiceError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn disabled_users_cannot_authenticate() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;
        let alice = principal(store.as_ref(), "alice", false).await;
        set_state(store.as_ref(), &admin, alice.id(), State::Disabled)
            .await
            .unwrap();
        let err = resolve_principal(store.as_ref(), &identity("alice@acme.test", false))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthenticated));
    }

    #[tokio::test]
    async fn listing_can_be_disabled_for_non_superusers() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;
        let alice = principal(store.as_ref(), "alice", false).await;

        let page = list(store.as_ref(), &alice, &RqlQuery::default()).await.unwrap();
        assert_eq!(page.pagination.total_count, 2);

        preference::set(
            store.as_ref(),
            &admin,
            Scope::Platform,
            vec![PreferenceInput {
                name: DISABLE_USERS_LISTING.to_string(),
                value: "true".to_string(),
            }],
        )
        .await
        .unwrap();

        assert!(matches!(
            list(store.as_ref(), &alice, &RqlQuery::default()).await,
            Err(ServiceError::PermissionDenied)
        ));
        assert!(list(store.as_ref(), &admin, &RqlQuery::default()).await.is_ok());
    }

    #[tokio::test]
    async fn update_is_self_service() {
        let store = seeded_store().await;
        let alice = principal(store.as_ref(), "alice", false).await;
        let bob = principal(store.as_ref(), "bob", false).await;

        let updated = update(
            store.as_ref(),
            &alice,
            alice.id(),
            UpdateUserRequest {
                title: Some("Alice A.".to_string()),
                ..UpdateUserRequest::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.title, "Alice A.");
        assert_eq!(get(store.as_ref(), "alice").await.unwrap().title, "Alice A.");

        let err = update(store.as_ref(), &alice, bob.id(), UpdateUserRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied));
    }
}
