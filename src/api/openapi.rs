use super::handlers::{
    audit, billing, check, groups, health, organizations, permissions, policies, preferences,
    projects, roles, users,
};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI document.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Handlers sharing a path must share one `routes!` call.
/// Routes added outside (like `/` or `OPTIONS /health`) are not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        // users
        .routes(routes!(users::create_user, users::list_users))
        .routes(routes!(users::search_users))
        .routes(routes!(users::current_user))
        .routes(routes!(users::current_user_organizations))
        .routes(routes!(
            users::list_current_user_preferences,
            users::set_current_user_preferences
        ))
        .routes(routes!(users::get_user, users::update_user, users::delete_user))
        .routes(routes!(users::enable_user))
        .routes(routes!(users::disable_user))
        // organizations
        .routes(routes!(
            organizations::create_organization,
            organizations::list_organizations
        ))
        .routes(routes!(organizations::search_organizations))
        .routes(routes!(
            organizations::get_organization,
            organizations::update_organization,
            organizations::delete_organization
        ))
        .routes(routes!(organizations::enable_organization))
        .routes(routes!(organizations::disable_organization))
        .routes(routes!(organizations::list_members, organizations::add_members))
        .routes(routes!(organizations::remove_member))
        // projects
        .routes(routes!(projects::create_project, projects::list_projects))
        .routes(routes!(
            projects::get_project,
            projects::update_project,
            projects::delete_project
        ))
        // groups
        .routes(routes!(groups::create_group, groups::list_groups))
        .routes(routes!(groups::get_group, groups::delete_group))
        .routes(routes!(groups::add_group_members))
        .routes(routes!(groups::remove_group_member))
        // roles, permissions, policies
        .routes(routes!(
            roles::list_platform_roles,
            roles::create_platform_role
        ))
        .routes(routes!(
            roles::list_organization_roles,
            roles::create_organization_role
        ))
        .routes(routes!(permissions::list_permissions))
        .routes(routes!(permissions::create_permissions))
        .routes(routes!(policies::create_policy, policies::list_policies))
        .routes(routes!(policies::delete_policy))
        .routes(routes!(check::check))
        .routes(routes!(check::batch_check))
        // preferences
        .routes(routes!(preferences::list_traits))
        .routes(routes!(
            preferences::list_platform_preferences,
            preferences::set_platform_preferences
        ))
        .routes(routes!(
            preferences::list_organization_preferences,
            preferences::set_organization_preferences
        ))
        // billing
        .routes(routes!(billing::create_plan, billing::list_plans))
        .routes(routes!(billing::grouped_plans))
        .routes(routes!(billing::get_plan))
        .routes(routes!(billing::list_products))
        // audit
        .routes(routes!(audit::create_audit_record))
        .routes(routes!(audit::list_organization_audit_records))
        .routes(routes!(audit::search_audit_records));

    let tags = [
        ("health", "Liveness and database status"),
        ("users", "Users and the calling user's own resources"),
        ("organizations", "Tenants and their members"),
        ("projects", "Projects inside an organization"),
        ("groups", "Groups of organization members"),
        ("roles", "Platform and organization roles"),
        ("permissions", "Permission catalogue"),
        ("policies", "Role bindings on resources"),
        ("authz", "Permission checks"),
        ("preferences", "Platform, organization and user preferences"),
        ("billing", "Plans, products and grouped pricing"),
        ("audit", "Audit log"),
        ("admin", "Superuser-only operations"),
    ];
    router.get_openapi_mut().tags = Some(
        tags.into_iter()
            .map(|(name, description)| {
                let mut tag = Tag::new(name);
                tag.description = Some(description.to_string());
                tag
            })
            .collect(),
    );

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    }
    match author.split_once('<') {
        Some((name, email)) => (non_empty(name), non_empty(email.trim_end_matches('>'))),
        None => (non_empty(author), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            doc.info.description.as_deref(),
            Some(env!("CARGO_PKG_DESCRIPTION"))
        );

        let contact = doc.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Frontier"));
            assert_eq!(contact.email.as_deref(), Some("team@frontier.dev"));
        }

        let license = doc.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "Apache-2.0");
            assert_eq!(license.identifier.as_deref(), Some("Apache-2.0"));
        }
    }

    #[test]
    fn openapi_tags_and_paths() {
        let doc = openapi();
        let tags = doc.tags.clone().unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "authz"));
        assert!(tags.iter().any(|tag| tag.name == "billing"));
        for path in [
            "/health",
            "/v1beta1/users/self",
            "/v1beta1/organizations/{id}/groups/{group_id}/users/{user_id}",
            "/v1beta1/batchcheck",
            "/v1beta1/billing/plans/grouped",
            "/v1beta1/admin/audit-records/search",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn parse_author_variants() {
        assert_eq!(
            parse_author("Team Frontier <team@frontier.dev>"),
            (Some("Team Frontier"), Some("team@frontier.dev"))
        );
        assert_eq!(parse_author("<ops@acme.test>"), (None, Some("ops@acme.test")));
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
    }
}
