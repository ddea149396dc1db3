//! Plan catalogue and the grouped pricing view built on top of it.
//!
//! There is no payment provider behind the catalogue; plans, products,
//! prices and features are plain records that clients render.

pub mod plan;
pub mod pricing;

pub use plan::{Feature, Plan, Price, Product};
pub use pricing::{GroupedPlan, IntervalPricing};
