//! Audit log endpoints.

use super::ListParams;
use crate::{
    api::{AppState, error::RpcStatus, principal::require_auth},
    domain::audit::{self, AuditRecord, CreateAuditRecordRequest},
    rql::{Group, Page, Pagination, RqlQuery},
};
use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditRecordResponse {
    pub audit_record: AuditRecord,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditRecordsResponse {
    pub audit_records: Vec<AuditRecord>,
    pub pagination: Pagination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<Group>,
}

impl From<Page<AuditRecord>> for AuditRecordsResponse {
    fn from(page: Page<AuditRecord>) -> Self {
        Self {
            audit_records: page.items,
            pagination: page.pagination,
            group: page.group,
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/audit-records",
    request_body = CreateAuditRecordRequest,
    responses(
        (status = 201, description = "Record stored.", body = AuditRecordResponse),
        (status = 200, description = "Replay of an already stored record.", body = AuditRecordResponse),
        (status = 400, description = "Missing event or resource.", body = RpcStatus),
        (status = 403, description = "Superuser only.", body = RpcStatus),
        (status = 409, description = "Idempotency key reused with different content.", body = RpcStatus),
    ),
    tag = "audit"
)]
pub async fn create_audit_record(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<CreateAuditRecordRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match audit::create(state.store.as_ref(), &principal, payload).await {
        Ok(ingested) => {
            let status = if ingested.replayed {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (
                status,
                Json(AuditRecordResponse {
                    audit_record: ingested.record,
                }),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/organizations/{id}/audit-records",
    params(("id" = Uuid, Path, description = "Organization id"), ListParams),
    responses(
        (status = 200, description = "Audit records of the organization.", body = AuditRecordsResponse),
        (status = 403, description = "Caller may not read the organization's log.", body = RpcStatus),
    ),
    tag = "audit"
)]
pub async fn list_organization_audit_records(
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match audit::list_for_org(state.store.as_ref(), &principal, org_id, params.into_rql()).await {
        Ok(page) => (StatusCode::OK, Json(AuditRecordsResponse::from(page))).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1beta1/admin/audit-records/search",
    request_body = RqlQuery,
    responses(
        (status = 200, description = "Matching audit records.", body = AuditRecordsResponse),
        (status = 400, description = "Invalid RQL query.", body = RpcStatus),
        (status = 403, description = "Superuser only.", body = RpcStatus),
    ),
    tag = "admin"
)]
pub async fn search_audit_records(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(query): Json<RqlQuery>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match audit::search(state.store.as_ref(), &principal, &query).await {
        Ok(page) => (StatusCode::OK, Json(AuditRecordsResponse::from(page))).into_response(),
        Err(err) => err.into_response(),
    }
}
