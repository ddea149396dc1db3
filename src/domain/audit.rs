//! Audit records: idempotent ingestion, emission from service mutations, and
//! RQL search.
//!
//! Every record carries a SHA-256 content hash. When an ingest request reuses
//! an idempotency key, the hash decides between a replay (same content, the
//! stored record is returned) and a conflict.

use super::{Metadata, ServiceError};
use crate::{
    authz::{
        self, Principal, Resource,
        schema::{ORGANIZATION_NAMESPACE, UPDATE_PERMISSION, USER_PRINCIPAL},
    },
    rql::{DataType, Field, Page, RqlQuery, RqlSchema, Value, memory::RqlRecord},
    store::{Store, StoreError},
};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const EVENT_USER_CREATED: &str = "app.user.created";
pub const EVENT_USER_UPDATED: &str = "app.user.updated";
pub const EVENT_USER_DELETED: &str = "app.user.deleted";
pub const EVENT_USER_ENABLED: &str = "app.user.enabled";
pub const EVENT_USER_DISABLED: &str = "app.user.disabled";
pub const EVENT_ORG_CREATED: &str = "app.organization.created";
pub const EVENT_ORG_UPDATED: &str = "app.organization.updated";
pub const EVENT_ORG_DELETED: &str = "app.organization.deleted";
pub const EVENT_ORG_ENABLED: &str = "app.organization.enabled";
pub const EVENT_ORG_DISABLED: &str = "app.organization.disabled";
pub const EVENT_ORG_MEMBER_CREATED: &str = "app.organization.member.created";
pub const EVENT_ORG_MEMBER_DELETED: &str = "app.organization.member.deleted";
pub const EVENT_PROJECT_CREATED: &str = "app.project.created";
pub const EVENT_PROJECT_UPDATED: &str = "app.project.updated";
pub const EVENT_PROJECT_DELETED: &str = "app.project.deleted";
pub const EVENT_GROUP_CREATED: &str = "app.group.created";
pub const EVENT_GROUP_DELETED: &str = "app.group.deleted";
pub const EVENT_GROUP_MEMBER_CREATED: &str = "app.group.member.created";
pub const EVENT_GROUP_MEMBER_DELETED: &str = "app.group.member.deleted";
pub const EVENT_ROLE_CREATED: &str = "app.role.created";
pub const EVENT_POLICY_CREATED: &str = "app.policy.created";
pub const EVENT_POLICY_DELETED: &str = "app.policy.deleted";
pub const EVENT_PREFERENCE_CREATED: &str = "app.preference.created";

pub static AUDIT_RQL_SCHEMA: RqlSchema = RqlSchema {
    table: "audit_records",
    fields: &[
        Field::new("id", DataType::String),
        Field::new("event", DataType::String).searchable().groupable(),
        Field::new("actor_id", DataType::String),
        Field::new("actor_type", DataType::String).groupable(),
        Field::new("actor_name", DataType::String).searchable(),
        Field::new("resource_id", DataType::String),
        Field::new("resource_type", DataType::String).groupable(),
        Field::new("resource_name", DataType::String).searchable(),
        Field::new("org_id", DataType::String),
        Field::new("occurred_at", DataType::Datetime),
        Field::new("created_at", DataType::Datetime),
    ],
};

/// Actor, resource or target of an audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

impl AuditEntity {
    pub fn new(kind: &str, id: impl ToString, name: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            name: name.into(),
        }
    }

    fn actor(principal: &Principal) -> Self {
        Self::new(USER_PRINCIPAL, principal.id(), principal.user.email.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditRecord {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub event: String,
    pub actor: AuditEntity,
    pub resource: AuditEntity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<AuditEntity>,
    pub org_id: Option<Uuid>,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub content_hash: String,
}

impl AuditRecord {
    #[allow(clippy::too_many_arguments)]
    fn build(
        idempotency_key: Option<String>,
        event: String,
        actor: AuditEntity,
        resource: AuditEntity,
        target: Option<AuditEntity>,
        org_id: Option<Uuid>,
        metadata: Metadata,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        // storage keeps microseconds; hash what will be stored
        let occurred_at = occurred_at.trunc_subsecs(6);
        let mut record = Self {
            id: Uuid::new_v4(),
            idempotency_key,
            event,
            actor,
            resource,
            target,
            org_id,
            metadata,
            occurred_at,
            created_at: Utc::now().trunc_subsecs(6),
            content_hash: String::new(),
        };
        record.content_hash = record.compute_hash();
        record
    }

    /// SHA-256 over the event content, excluding ids and the ingest time.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let content = json!({
            "event": self.event,
            "actor": self.actor,
            "resource": self.resource,
            "target": self.target,
            "org_id": self.org_id,
            "metadata": self.metadata,
            "occurred_at": self.occurred_at.to_rfc3339(),
        });
        let digest = Sha256::digest(content.to_string().as_bytes());
        Base64::encode_string(&digest)
    }
}

impl RqlRecord for AuditRecord {
    fn rql_value(&self, field: &str) -> Value {
        match field {
            "id" => Value::String(self.id.to_string()),
            "event" => Value::String(self.event.clone()),
            "actor_id" => Value::String(self.actor.id.clone()),
            "actor_type" => Value::String(self.actor.kind.clone()),
            "actor_name" => Value::String(self.actor.name.clone()),
            "resource_id" => Value::String(self.resource.id.clone()),
            "resource_type" => Value::String(self.resource.kind.clone()),
            "resource_name" => Value::String(self.resource.name.clone()),
            "org_id" => self
                .org_id
                .map_or(Value::None, |id| Value::String(id.to_string())),
            "occurred_at" => Value::Datetime(self.occurred_at),
            "created_at" => Value::Datetime(self.created_at),
            _ => Value::None,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAuditRecordRequest {
    pub idempotency_key: Option<String>,
    pub event: String,
    /// Defaults to the caller.
    pub actor: Option<AuditEntity>,
    pub resource: AuditEntity,
    pub target: Option<AuditEntity>,
    pub org_id: Option<Uuid>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
    pub occurred_at: DateTime<Utc>,
}

/// Result of an ingest: the stored record and whether it was a replay.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub record: AuditRecord,
    pub replayed: bool,
}

/// Ingests an externally supplied audit record. Superuser only.
///
/// # Errors
/// `PermissionDenied` for non-superusers, `InvalidArgument` for a blank event,
/// `Conflict` when the idempotency key was used for different content.
#[instrument(skip(store, principal, request), fields(event = %request.event))]
pub async fn create(
    store: &dyn Store,
    principal: &Principal,
    request: CreateAuditRecordRequest,
) -> Result<Ingested, ServiceError> {
    if !principal.superuser {
        return Err(ServiceError::PermissionDenied);
    }
    let event = request.event.trim().to_string();
    if event.is_empty() {
        return Err(ServiceError::invalid("event is required"));
    }
    let key = super::non_empty(request.idempotency_key.as_deref()).map(str::to_string);

    let record = AuditRecord::build(
        key.clone(),
        event,
        request.actor.unwrap_or_else(|| AuditEntity::actor(principal)),
        request.resource,
        request.target,
        request.org_id,
        request.metadata.unwrap_or_default(),
        request.occurred_at,
    );

    if let Some(key) = &key {
        if let Some(existing) = store.fetch_audit_record_by_key(key).await? {
            return replay(existing, &record);
        }
    }

    match store.insert_audit_record(&record).await {
        Ok(()) => Ok(Ingested {
            record,
            replayed: false,
        }),
        // lost a race with a concurrent ingest of the same key
        Err(StoreError::Conflict(_)) if key.is_some() => {
            let existing = match &key {
                Some(key) => store.fetch_audit_record_by_key(key).await?,
                None => None,
            };
            match existing {
                Some(existing) => replay(existing, &record),
                None => Err(ServiceError::conflict("audit record already exists")),
            }
        }
        Err(err) => Err(err.into()),
    }
}

fn replay(existing: AuditRecord, incoming: &AuditRecord) -> Result<Ingested, ServiceError> {
    if existing.content_hash == incoming.content_hash {
        Ok(Ingested {
            record: existing,
            replayed: true,
        })
    } else {
        Err(ServiceError::conflict(
            "idempotency key already used with different content",
        ))
    }
}

/// Records a mutation performed by `principal`. Failures are logged, not returned.
pub async fn emit(
    store: &dyn Store,
    principal: &Principal,
    event: &str,
    resource: AuditEntity,
    target: Option<AuditEntity>,
    org_id: Option<Uuid>,
) {
    let record = AuditRecord::build(
        None,
        event.to_string(),
        AuditEntity::actor(principal),
        resource,
        target,
        org_id,
        Metadata::new(),
        Utc::now(),
    );
    if let Err(err) = store.insert_audit_record(&record).await {
        warn!(event, "failed to write audit record: {err}");
    }
}

/// Lists the audit log of one organization. Requires `update` on it.
///
/// # Errors
/// `PermissionDenied` without `update`, `InvalidArgument` for a bad query.
pub async fn list_for_org(
    store: &dyn Store,
    principal: &Principal,
    org_id: Uuid,
    query: RqlQuery,
) -> Result<Page<AuditRecord>, ServiceError> {
    let org = Resource::new(ORGANIZATION_NAMESPACE, org_id.to_string());
    authz::require(store, principal, UPDATE_PERMISSION, &org).await?;
    let compiled = query
        .with_eq("org_id", org_id.to_string())
        .compile(&AUDIT_RQL_SCHEMA)?;
    Ok(store.search_audit_records(&compiled).await?)
}

/// RQL search across every audit record. Superuser only.
///
/// # Errors
/// `PermissionDenied` for non-superusers, `InvalidArgument` for a bad query.
pub async fn search(
    store: &dyn Store,
    principal: &Principal,
    query: &RqlQuery,
) -> Result<Page<AuditRecord>, ServiceError> {
    if !principal.superuser {
        return Err(ServiceError::PermissionDenied);
    }
    let compiled = query.compile(&AUDIT_RQL_SCHEMA)?;
    Ok(store.search_audit_records(&compiled).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::testing::{principal, seeded_store};
    use chrono::TimeZone;

    fn request(key: &str, event: &str) -> CreateAuditRecordRequest {
        CreateAuditRecordRequest {
            idempotency_key: Some(key.to_string()),
            event: event.to_string(),
            actor: None,
            resource: AuditEntity::new("app/project", "p-1", "web"),
            target: None,
            org_id: None,
            metadata: None,
            occurred_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn replay_returns_the_stored_record() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;

        let first = create(store.as_ref(), &admin, request("k-1", "app.project.deployed"))
            .await
            .unwrap();
        assert!(!first.replayed);

        let second = create(store.as_ref(), &admin, request("k-1", "app.project.deployed"))
            .await
            .unwrap();
        assert!(second.replayed);
        assert_eq!(second.record.id, first.record.id);
    }

    #[tokio::test]
    async fn different_content_under_same_key_conflicts() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;

        create(store.as_ref(), &admin, request("k-2", "app.project.deployed"))
            .await
            .unwrap();
        let err = create(store.as_ref(), &admin, request("k-2", "app.project.rolled_back"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn ingest_requires_superuser() {
        let store = seeded_store().await;
        let user = principal(store.as_ref(), "alice", false).await;
        let err = create(store.as_ref(), &user, request("k-3", "app.project.deployed"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied));
    }

    #[test]
    fn hash_ignores_ids_and_ingest_time() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let entity = AuditEntity::new("app/user", "u-1", "alice@acme.test");
        let make = || {
            AuditRecord::build(
                None,
                "app.user.created".to_string(),
                entity.clone(),
                entity.clone(),
                None,
                None,
                Metadata::new(),
                at,
            )
        };
        let (a, b) = (make(), make());
        assert_ne!(a.id, b.id);
        assert_eq!(a.content_hash, b.content_hash);
    }
}
