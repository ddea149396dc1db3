//! Store tests against a real PostgreSQL.
//!
//! Set `FRONTIER_TEST_DSN` to a disposable database to run them; without it
//! every test returns early.

use anyhow::{Context, Result};
use frontier::{
    authz::{
        self, Identity, Principal, Resource,
        schema::{ROLE_ORGANIZATION_OWNER, USER_PRINCIPAL},
    },
    domain::{
        ServiceError, bootstrap,
        organization::{self, CreateOrganizationRequest},
        policy::{Policy, PolicyFilter},
        user::{self, CreateUserRequest},
    },
    rql::RqlQuery,
    store::{Store, postgres::PgStore},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use ulid::Ulid;

async fn store() -> Result<Option<PgStore>> {
    let Ok(dsn) = std::env::var("FRONTIER_TEST_DSN") else {
        eprintln!("Skipping postgres test: FRONTIER_TEST_DSN is not set");
        return Ok(None);
    };
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&dsn)
        .await
        .context("failed to connect test pool")?;
    let store = PgStore::new(pool);
    store.apply_schema().await.context("failed to apply schema")?;
    bootstrap::run(&store).await.context("bootstrap failed")?;
    Ok(Some(store))
}

fn unique_email() -> String {
    format!("{}@acme.test", Ulid::new().to_string().to_lowercase())
}

async fn signed_up(store: &PgStore, title: &str) -> Result<Principal> {
    let identity = Identity {
        email: unique_email(),
        superuser: false,
    };
    user::create(
        store,
        &identity,
        CreateUserRequest {
            email: identity.email.clone(),
            name: None,
            title: Some(title.to_string()),
            avatar: None,
            metadata: None,
        },
    )
    .await?;
    Ok(user::resolve_principal(store, &identity).await?)
}

#[tokio::test]
async fn schema_and_bootstrap_are_idempotent() -> Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    store.apply_schema().await?;
    bootstrap::run(&store).await?;

    store.ping().await?;
    assert!(!store.fetch_permissions().await?.is_empty());
    assert!(!store.fetch_roles(None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn owner_can_manage_new_organization() -> Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let identity = Identity {
        email: unique_email(),
        superuser: false,
    };
    user::create(
        &store,
        &identity,
        CreateUserRequest {
            email: identity.email.clone(),
            name: None,
            title: Some("Owner".to_string()),
            avatar: None,
            metadata: None,
        },
    )
    .await?;
    let principal = user::resolve_principal(&store, &identity).await?;

    let org = organization::create(
        &store,
        &principal,
        CreateOrganizationRequest {
            name: Some(format!("org-{}", Ulid::new().to_string().to_lowercase())),
            title: "Postgres Org".to_string(),
            avatar: None,
            metadata: None,
        },
    )
    .await?;

    let resource = Resource::new("app/organization", org.id.to_string());
    assert!(authz::check(&store, &principal, "update", &resource).await?);

    let members = organization::list_members(&store, &principal, org.id).await?;
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].email, identity.email);

    let page = organization::list(&store, &principal, &RqlQuery::default()).await?;
    assert!(page.items.iter().any(|item| item.id == org.id));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_owner_removals_keep_an_owner() -> Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let store = Arc::new(store);
    let alice = signed_up(&store, "Alice").await?;
    let bob = signed_up(&store, "Bob").await?;
    let org = organization::create(
        store.as_ref(),
        &alice,
        CreateOrganizationRequest {
            name: Some(format!("org-{}", Ulid::new().to_string().to_lowercase())),
            title: "Two Owners".to_string(),
            avatar: None,
            metadata: None,
        },
    )
    .await?;
    let owner = store
        .fetch_role_by_name(None, ROLE_ORGANIZATION_OWNER)
        .await?
        .context("owner role missing")?
        .id;
    store
        .insert_policy(&Policy::new(
            owner,
            org.resource(),
            Resource::new(USER_PRINCIPAL, bob.id().to_string()),
        ))
        .await?;

    let org_id = org.id;
    let removals = [(alice.clone(), bob.id()), (bob.clone(), alice.id())].map(|(by, target)| {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            organization::remove_member(store.as_ref(), &by, org_id, target).await
        })
    });
    let mut removed = 0;
    for removal in removals {
        match removal.await? {
            Ok(()) => removed += 1,
            Err(ServiceError::FailedPrecondition(_) | ServiceError::PermissionDenied) => {}
            Err(err) => return Err(err.into()),
        }
    }
    assert_eq!(removed, 1);

    let owners = store
        .fetch_policies(&PolicyFilter {
            resources: vec![org.resource()],
            role_id: Some(owner),
            ..PolicyFilter::default()
        })
        .await?;
    assert_eq!(owners.len(), 1);
    Ok(())
}
