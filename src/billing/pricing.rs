//! Grouping of plans into one pricing card per offering.
//!
//! Plans that differ only by billing interval (a monthly and a yearly
//! "Starter") are folded into a single [`GroupedPlan`] keyed by a slug. The
//! slug is `metadata.plan_group_id` when set, otherwise the slugified title
//! followed by the sorted product ids.

use super::plan::{Feature, Plan};
use crate::domain::slug::slugify;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct IntervalPricing {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub amount: i64,
    pub currency: String,
    pub interval: String,
    pub weightage: f64,
    pub product_names: Vec<String>,
    /// Empty when the plan has no trial.
    pub trial_days: String,
    pub features: BTreeMap<String, Feature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GroupedPlan {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub weightage: f64,
    pub intervals: BTreeMap<String, IntervalPricing>,
    pub features: BTreeMap<String, Feature>,
}

fn weightage(plan: &Plan) -> f64 {
    match plan.metadata.get("weightage") {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(raw)) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|weight| weight.is_finite())
    .unwrap_or_default()
}

fn group_slug(plan: &Plan) -> String {
    if let Some(group) = plan
        .metadata
        .get("plan_group_id")
        .and_then(Value::as_str)
        .filter(|group| !group.is_empty())
    {
        return group.to_string();
    }
    let mut ids: Vec<String> = plan
        .products
        .iter()
        .map(|product| product.id.to_string())
        .collect();
    ids.sort();
    // the separator stays even without products: "free-"
    format!("{}-{}", slugify(&plan.title), ids.join("-"))
}

fn interval_pricing(plan: &Plan) -> IntervalPricing {
    let mut amount = 0;
    let mut currency = None;
    for price in plan
        .products
        .iter()
        .flat_map(|product| &product.prices)
        .filter(|price| price.interval == plan.interval)
    {
        amount += price.amount;
        currency.get_or_insert_with(|| price.currency.clone());
    }

    let features = plan
        .products
        .iter()
        .flat_map(|product| &product.features)
        .map(|feature| (feature.name.clone(), feature.clone()))
        .collect();

    IntervalPricing {
        plan_id: plan.id,
        plan_name: plan.name.clone(),
        amount,
        currency: currency.unwrap_or_default(),
        interval: plan.interval.clone(),
        weightage: weightage(plan),
        product_names: plan
            .products
            .iter()
            .map(|product| product.name.clone())
            .collect(),
        trial_days: if plan.trial_days == 0 {
            String::new()
        } else {
            plan.trial_days.to_string()
        },
        features,
    }
}

/// Folds plans into pricing groups, keeping the order in which groups first appear.
#[must_use]
pub fn group_plans_pricing_by_interval(plans: &[Plan]) -> Vec<GroupedPlan> {
    let mut groups: Vec<GroupedPlan> = Vec::new();
    for plan in plans {
        let slug = group_slug(plan);
        let pricing = interval_pricing(plan);
        let index = match groups.iter().position(|group| group.slug == slug) {
            Some(index) => index,
            None => {
                groups.push(GroupedPlan {
                    slug,
                    title: plan.title.clone(),
                    description: plan.description.clone(),
                    weightage: 0.0,
                    intervals: BTreeMap::new(),
                    features: BTreeMap::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];
        group.weightage += pricing.weightage;
        group.features.extend(
            pricing
                .features
                .iter()
                .map(|(name, feature)| (name.clone(), feature.clone())),
        );
        // a later plan on the same interval replaces the earlier one
        group.intervals.insert(plan.interval.clone(), pricing);
    }
    groups
}

/// Ascending by weightage; ties keep their order.
#[must_use]
pub fn sort_by_weightage(mut plans: Vec<GroupedPlan>) -> Vec<GroupedPlan> {
    plans.sort_by(|a, b| a.weightage.total_cmp(&b.weightage));
    plans
}

/// The value of `feature` for this interval: the first entry of the feature's
/// metadata keyed by one of the interval's product names.
#[must_use]
pub fn feature_value(pricing: &IntervalPricing, feature: &str) -> Option<String> {
    let feature = pricing.features.get(feature)?;
    pricing
        .product_names
        .iter()
        .find_map(|name| feature.metadata.get(name))
        .map(|value| match value {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        })
}
