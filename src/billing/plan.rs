//! Plans, products, prices and features.

use super::pricing::{self, GroupedPlan};
use crate::{
    authz::Principal,
    domain::{Metadata, ServiceError, State, non_empty},
    store::Store,
};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

pub const INTERVALS: &[&str] = &["day", "week", "month", "year"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    #[default]
    Basic,
    Credits,
    PerSeat,
}

impl Behavior {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Credits => "credits",
            Self::PerSeat => "per_seat",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "credits" => Self::Credits,
            "per_seat" => Self::PerSeat,
            _ => Self::Basic,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UsageType {
    #[default]
    Licensed,
    Metered,
}

impl UsageType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Licensed => "licensed",
            Self::Metered => "metered",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "metered" {
            Self::Metered
        } else {
            Self::Licensed
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BillingScheme {
    #[default]
    Flat,
    Tiered,
}

impl BillingScheme {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Tiered => "tiered",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "tiered" {
            Self::Tiered
        } else {
            Self::Flat
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Price {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub interval: String,
    /// Minor currency unit.
    pub amount: i64,
    pub currency: String,
    pub usage_type: UsageType,
    pub billing_scheme: BillingScheme,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Feature {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub description: String,
    pub behavior: Behavior,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub prices: Vec<Price>,
    pub features: Vec<Feature>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub description: String,
    pub interval: String,
    pub trial_days: i64,
    pub on_start_credits: i64,
    pub state: State,
    #[schema(value_type = Object)]
    pub metadata: Metadata,
    pub products: Vec<Product>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PriceInput {
    #[serde(default)]
    pub name: String,
    pub interval: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub usage_type: UsageType,
    #[serde(default)]
    pub billing_scheme: BillingScheme,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

fn default_currency() -> String {
    "usd".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FeatureInput {
    pub name: String,
    pub title: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProductInput {
    pub name: String,
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub behavior: Behavior,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub prices: Vec<PriceInput>,
    #[serde(default)]
    pub features: Vec<FeatureInput>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePlanRequest {
    pub name: String,
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    pub interval: String,
    #[serde(default)]
    pub trial_days: i64,
    #[serde(default)]
    pub on_start_credits: i64,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub products: Vec<ProductInput>,
}

fn valid_interval(interval: &str) -> Result<String, ServiceError> {
    let interval = interval.trim().to_lowercase();
    if INTERVALS.contains(&interval.as_str()) {
        Ok(interval)
    } else {
        Err(ServiceError::invalid(format!(
            "invalid interval {interval:?}, expected one of day, week, month, year"
        )))
    }
}

fn build_product(input: ProductInput, now: DateTime<Utc>) -> Result<Product, ServiceError> {
    let name = input.name.trim().to_lowercase();
    if name.is_empty() {
        return Err(ServiceError::invalid("product name is required"));
    }
    let id = Uuid::new_v4();

    let mut prices = Vec::with_capacity(input.prices.len());
    for price in input.prices {
        let interval = valid_interval(&price.interval)?;
        prices.push(Price {
            id: Uuid::new_v4(),
            product_id: id,
            name: non_empty(Some(price.name.as_str()))
                .map_or_else(|| format!("{name}_{interval}"), str::to_string),
            interval,
            amount: price.amount,
            currency: price.currency.trim().to_lowercase(),
            usage_type: price.usage_type,
            billing_scheme: price.billing_scheme,
            metadata: price.metadata.unwrap_or_default(),
        });
    }

    let features = input
        .features
        .into_iter()
        .map(|feature| Feature {
            id: Uuid::new_v4(),
            title: non_empty(feature.title.as_deref())
                .unwrap_or(&feature.name)
                .to_string(),
            name: feature.name.trim().to_lowercase(),
            metadata: feature.metadata.unwrap_or_default(),
        })
        .collect();

    Ok(Product {
        id,
        title: non_empty(input.title.as_deref()).unwrap_or(&name).to_string(),
        name,
        description: input.description,
        behavior: input.behavior,
        metadata: input.metadata.unwrap_or_default(),
        prices,
        features,
        created_at: now,
        updated_at: now,
    })
}

/// Creates or updates a plan by name together with its products. Superuser only.
///
/// # Errors
/// `PermissionDenied` for non-superusers. `InvalidArgument` for a bad
/// interval, more than one `per_seat` product, or a product without a price
/// for the plan's interval.
#[instrument(skip(store, principal, request), fields(plan = %request.name))]
pub async fn create(
    store: &dyn Store,
    principal: &Principal,
    request: CreatePlanRequest,
) -> Result<Plan, ServiceError> {
    if !principal.superuser {
        return Err(ServiceError::PermissionDenied);
    }
    let name = request.name.trim().to_lowercase();
    if name.is_empty() {
        return Err(ServiceError::invalid("plan name is required"));
    }
    let interval = valid_interval(&request.interval)?;
    let now = Utc::now().trunc_subsecs(6);

    let products = request
        .products
        .into_iter()
        .map(|input| build_product(input, now))
        .collect::<Result<Vec<_>, _>>()?;
    if products
        .iter()
        .filter(|product| product.behavior == Behavior::PerSeat)
        .count()
        > 1
    {
        return Err(ServiceError::invalid(format!(
            "plan {name} has more than one product with per_seat behavior"
        )));
    }
    if let Some(product) = products
        .iter()
        .find(|product| !product.prices.iter().any(|price| price.interval == interval))
    {
        return Err(ServiceError::invalid(format!(
            "product {} has no prices registered with interval {interval}",
            product.name
        )));
    }

    let plan = Plan {
        id: Uuid::new_v4(),
        title: non_empty(request.title.as_deref()).unwrap_or(&name).to_string(),
        name,
        description: request.description,
        interval,
        trial_days: request.trial_days.max(0),
        on_start_credits: request.on_start_credits.max(0),
        state: State::Enabled,
        metadata: request.metadata.unwrap_or_default(),
        products,
        created_at: now,
        updated_at: now,
    };
    let stored = store.upsert_plan(&plan).await?;
    info!(plan_id = %stored.id, "plan stored");
    Ok(stored)
}

/// Looks up a plan by id or by name.
///
/// # Errors
/// `NotFound` when no plan matches.
pub async fn get(store: &dyn Store, id_or_name: &str) -> Result<Plan, ServiceError> {
    let plan = match Uuid::parse_str(id_or_name) {
        Ok(id) => store.fetch_plan(id).await?,
        Err(_) => store.fetch_plan_by_name(&id_or_name.to_lowercase()).await?,
    };
    plan.ok_or(ServiceError::NotFound("plan"))
}

/// # Errors
/// Returns a store error if plans cannot be loaded.
pub async fn list(store: &dyn Store) -> Result<Vec<Plan>, ServiceError> {
    Ok(store.fetch_plans().await?)
}

/// # Errors
/// Returns a store error if products cannot be loaded.
pub async fn list_products(store: &dyn Store) -> Result<Vec<Product>, ServiceError> {
    Ok(store.fetch_products().await?)
}

/// Every plan grouped by pricing interval, lightest first.
///
/// # Errors
/// Returns a store error if plans cannot be loaded.
pub async fn grouped(store: &dyn Store) -> Result<Vec<GroupedPlan>, ServiceError> {
    let plans = store.fetch_plans().await?;
    Ok(pricing::sort_by_weightage(
        pricing::group_plans_pricing_by_interval(&plans),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::testing::{principal, seeded_store};

    fn price(interval: &str, amount: i64) -> PriceInput {
        PriceInput {
            name: String::new(),
            interval: interval.to_string(),
            amount,
            currency: "USD".to_string(),
            usage_type: UsageType::Licensed,
            billing_scheme: BillingScheme::Flat,
            metadata: None,
        }
    }

    fn product(name: &str, behavior: Behavior, prices: Vec<PriceInput>) -> ProductInput {
        ProductInput {
            name: name.to_string(),
            title: None,
            description: String::new(),
            behavior,
            metadata: None,
            prices,
            features: vec![FeatureInput {
                name: name.to_string(),
                title: None,
                metadata: None,
            }],
        }
    }

    fn request(name: &str, interval: &str, products: Vec<ProductInput>) -> CreatePlanRequest {
        CreatePlanRequest {
            name: name.to_string(),
            title: None,
            description: String::new(),
            interval: interval.to_string(),
            trial_days: 0,
            on_start_credits: 0,
            metadata: None,
            products,
        }
    }

    #[tokio::test]
    async fn plans_are_normalized_and_retrievable() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;

        let plan = create(
            store.as_ref(),
            &admin,
            request(
                "Starter",
                "Month",
                vec![product("seats", Behavior::PerSeat, vec![price("month", 500)])],
            ),
        )
        .await
        .unwrap();
        assert_eq!(plan.name, "starter");
        assert_eq!(plan.interval, "month");
        assert_eq!(plan.products[0].prices[0].currency, "usd");
        assert_eq!(plan.products[0].prices[0].name, "seats_month");

        assert_eq!(get(store.as_ref(), "STARTER").await.unwrap().id, plan.id);
        assert_eq!(get(store.as_ref(), &plan.id.to_string()).await.unwrap(), plan);
        assert_eq!(list_products(store.as_ref()).await.unwrap().len(), 1);

        // same name upserts
        let again = create(
            store.as_ref(),
            &admin,
            request(
                "starter",
                "month",
                vec![product("seats", Behavior::PerSeat, vec![price("month", 700)])],
            ),
        )
        .await
        .unwrap();
        assert_eq!(again.id, plan.id);
        assert_eq!(again.products[0].id, plan.products[0].id);
        assert_eq!(again.products[0].prices[0].amount, 700);
        assert_eq!(list(store.as_ref()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_invalid_plans() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;
        let alice = principal(store.as_ref(), "alice", false).await;

        assert!(matches!(
            create(store.as_ref(), &alice, request("basic", "month", Vec::new())).await,
            Err(ServiceError::PermissionDenied)
        ));
        assert!(matches!(
            create(store.as_ref(), &admin, request("basic", "fortnight", Vec::new())).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            create(
                store.as_ref(),
                &admin,
                request(
                    "basic",
                    "month",
                    vec![product("storage", Behavior::Basic, vec![price("year", 100)])],
                ),
            )
            .await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            create(
                store.as_ref(),
                &admin,
                request(
                    "basic",
                    "month",
                    vec![
                        product("seats", Behavior::PerSeat, vec![price("month", 1)]),
                        product("guests", Behavior::PerSeat, vec![price("month", 1)]),
                    ],
                ),
            )
            .await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            get(store.as_ref(), "basic").await,
            Err(ServiceError::NotFound("plan"))
        ));
    }
}
