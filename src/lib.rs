//! # Frontier (Identity, Access Management and Billing)
//!
//! `frontier` is a multi-tenant IAM service. It keeps users, organizations,
//! projects and groups, binds principals to roles through policies, and
//! answers permission checks over that graph. A small billing catalogue
//! (plans, products, prices, features) and an audit log round out the API.
//!
//! ## Tenant Model
//!
//! Organizations are the tenant boundary. Projects and groups belong to
//! exactly one organization, and a policy on an organization reaches every
//! project and group beneath it.
//!
//! - **Slug Normalization:** organization, project and group names are
//!   normalized to lowercase, URL-safe strings (`[a-z0-9-]`).
//! - **Identity:** callers are resolved from an identity header set by an
//!   authenticating proxy. Superusers are configured by email.
//!
//! ## Authorization
//!
//! Roles carry permission slugs such as `app_project_update`. A policy binds a
//! role to a principal on a resource; the check engine in [`authz`] walks the
//! policies of the user and the groups the user belongs to.
//!
//! ## Queries
//!
//! List endpoints accept RQL (see [`rql`]): filters, search, sort, group-by and
//! pagination, evaluated either as bound SQL or in memory.

pub mod api;
pub mod authz;
pub mod billing;
pub mod cli;
pub mod domain;
pub mod rql;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
