//! Route handlers for the `/v1beta1` API.
//!
//! Handlers authenticate the caller, call into [`crate::domain`] or
//! [`crate::billing`], and wrap results in resource-named envelopes such as
//! `{"user": ...}` or `{"users": [...], "pagination": ...}`.

pub mod audit;
pub mod billing;
pub mod check;
pub mod groups;
pub mod health;
pub mod organizations;
pub mod permissions;
pub mod policies;
pub mod preferences;
pub mod projects;
pub mod roles;
pub mod root;
pub mod users;

use crate::rql::RqlQuery;
use serde::Deserialize;
use utoipa::IntoParams;

/// Pagination and free-text search accepted by plain `GET` list endpoints.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Page size, capped server side.
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Matched against the searchable columns of the resource.
    pub search: Option<String>,
}

impl ListParams {
    pub fn into_rql(self) -> RqlQuery {
        RqlQuery::paged(self.limit, self.offset, self.search)
    }
}
