//! Plan and product catalogue endpoints.
//!
//! Reading the catalogue needs no caller; it backs public pricing pages.

use crate::{
    api::{AppState, error::RpcStatus, principal::require_auth},
    billing::{
        plan::{self, CreatePlanRequest, Plan, Product},
        pricing::GroupedPlan,
    },
};
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct PlanResponse {
    pub plan: Plan,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PlansResponse {
    pub plans: Vec<Plan>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupedPlansResponse {
    /// Ordered by ascending weightage.
    pub plans: Vec<GroupedPlan>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductsResponse {
    pub products: Vec<Product>,
}

#[utoipa::path(
    post,
    path = "/v1beta1/billing/plans",
    request_body = CreatePlanRequest,
    responses(
        (status = 201, description = "Plan created, or replaced when the name exists.", body = PlanResponse),
        (status = 400, description = "Unknown interval or inconsistent prices.", body = RpcStatus),
        (status = 403, description = "Superuser only.", body = RpcStatus),
    ),
    tag = "billing"
)]
pub async fn create_plan(
    headers: HeaderMap,
    state: Extension<AppState>,
    Json(payload): Json<CreatePlanRequest>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match plan::create(state.store.as_ref(), &principal, payload).await {
        Ok(plan) => (StatusCode::CREATED, Json(PlanResponse { plan })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/billing/plans",
    responses(
        (status = 200, description = "Every plan with its products.", body = PlansResponse),
    ),
    tag = "billing"
)]
pub async fn list_plans(state: Extension<AppState>) -> impl IntoResponse {
    match plan::list(state.store.as_ref()).await {
        Ok(plans) => (StatusCode::OK, Json(PlansResponse { plans })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/billing/plans/grouped",
    responses(
        (status = 200, description = "Plans merged by slug with per-interval pricing.", body = GroupedPlansResponse),
    ),
    tag = "billing"
)]
pub async fn grouped_plans(state: Extension<AppState>) -> impl IntoResponse {
    match plan::grouped(state.store.as_ref()).await {
        Ok(plans) => (StatusCode::OK, Json(GroupedPlansResponse { plans })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/billing/plans/{id}",
    params(("id" = String, Path, description = "Plan id or name")),
    responses(
        (status = 200, description = "Plan detail.", body = PlanResponse),
        (status = 404, description = "Plan not found.", body = RpcStatus),
    ),
    tag = "billing"
)]
pub async fn get_plan(Path(id): Path<String>, state: Extension<AppState>) -> impl IntoResponse {
    match plan::get(state.store.as_ref(), &id).await {
        Ok(plan) => (StatusCode::OK, Json(PlanResponse { plan })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1beta1/billing/products",
    responses(
        (status = 200, description = "Every product with prices and features.", body = ProductsResponse),
    ),
    tag = "billing"
)]
pub async fn list_products(state: Extension<AppState>) -> impl IntoResponse {
    match plan::list_products(state.store.as_ref()).await {
        Ok(products) => (StatusCode::OK, Json(ProductsResponse { products })).into_response(),
        Err(err) => err.into_response(),
    }
}
