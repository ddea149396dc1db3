//! Namespaces, permission naming and the predefined platform roles.

pub const DEFAULT_SERVICE: &str = "app";

pub const PLATFORM_NAMESPACE: &str = "app/platform";
pub const ORGANIZATION_NAMESPACE: &str = "app/organization";
pub const PROJECT_NAMESPACE: &str = "app/project";
pub const GROUP_NAMESPACE: &str = "app/group";

pub const USER_PRINCIPAL: &str = "app/user";
pub const SERVICE_USER_PRINCIPAL: &str = "app/serviceuser";
pub const SUPERUSER_PRINCIPAL: &str = "app/superuser";
pub const GROUP_PRINCIPAL: &str = GROUP_NAMESPACE;

/// The platform singleton used as resource id for platform-level checks.
pub const PLATFORM_ID: &str = "platform";

pub const ADMINISTER_PERMISSION: &str = "administer";
pub const GET_PERMISSION: &str = "get";
pub const UPDATE_PERMISSION: &str = "update";
pub const DELETE_PERMISSION: &str = "delete";
pub const ROLE_MANAGE_PERMISSION: &str = "rolemanage";
pub const POLICY_MANAGE_PERMISSION: &str = "policymanage";
pub const PROJECT_LIST_PERMISSION: &str = "projectlist";
pub const PROJECT_CREATE_PERMISSION: &str = "projectcreate";
pub const GROUP_LIST_PERMISSION: &str = "grouplist";
pub const GROUP_CREATE_PERMISSION: &str = "groupcreate";
pub const SUPERUSER_PERMISSION: &str = "superuser";
/// Holds when the principal has any policy on the organization.
pub const MEMBERSHIP_PERMISSION: &str = "membership";

pub const ROLE_ORGANIZATION_OWNER: &str = "app_organization_owner";
pub const ROLE_ORGANIZATION_MANAGER: &str = "app_organization_manager";
pub const ROLE_ORGANIZATION_ACCESS_MANAGER: &str = "app_organization_accessmanager";
pub const ROLE_ORGANIZATION_VIEWER: &str = "app_organization_viewer";
pub const ROLE_PROJECT_OWNER: &str = "app_project_owner";
pub const ROLE_PROJECT_MANAGER: &str = "app_project_manager";
pub const ROLE_PROJECT_VIEWER: &str = "app_project_viewer";
pub const ROLE_GROUP_OWNER: &str = "app_group_owner";
pub const ROLE_GROUP_MEMBER: &str = "app_group_member";

/// Resolves the short aliases accepted on the wire to full namespaces.
#[must_use]
pub fn parse_namespace_alias(namespace: &str) -> &str {
    match namespace {
        "user" => USER_PRINCIPAL,
        "superuser" => SUPERUSER_PRINCIPAL,
        "serviceuser" => SERVICE_USER_PRINCIPAL,
        "group" => GROUP_PRINCIPAL,
        "org" | "organization" => ORGANIZATION_NAMESPACE,
        "project" => PROJECT_NAMESPACE,
        other => other,
    }
}

/// Splits `service/resource`; a bare service gets the `default` resource.
#[must_use]
pub fn split_namespace(namespace: &str) -> (&str, &str) {
    let namespace = parse_namespace_alias(namespace);
    match namespace.split_once('/') {
        Some((service, resource)) => (service, resource),
        None => (namespace, "default"),
    }
}

/// `app/project` + `get` → `app_project_get`
#[must_use]
pub fn permission_slug(namespace: &str, verb: &str) -> String {
    let (service, resource) = split_namespace(namespace);
    format!("{service}_{resource}_{verb}")
}

/// `app/project` + `get` → `app.project.get`
#[must_use]
pub fn permission_key(namespace: &str, verb: &str) -> String {
    let (service, resource) = split_namespace(namespace);
    format!("{service}.{resource}.{verb}")
}

/// `app.project.get` → (`app/project`, `get`); `None` unless the key has three parts.
#[must_use]
pub fn namespace_and_name_from_key(key: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = key.split('.').collect();
    match parts.as_slice() {
        [service, resource, name] => Some((format!("{service}/{resource}"), (*name).to_string())),
        _ => None,
    }
}

/// Permission names are ASCII alphanumeric and non-empty.
#[must_use]
pub fn is_valid_permission_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|ch| ch.is_ascii_alphanumeric())
}

#[must_use]
pub fn is_system_namespace(namespace: &str) -> bool {
    matches!(
        namespace,
        ORGANIZATION_NAMESPACE
            | PROJECT_NAMESPACE
            | GROUP_NAMESPACE
            | PLATFORM_NAMESPACE
            | USER_PRINCIPAL
            | SERVICE_USER_PRINCIPAL
            | SUPERUSER_PRINCIPAL
    )
}

/// Verbs seeded for every system namespace.
pub const BASE_PERMISSIONS: &[(&str, &[&str])] = &[
    (
        ORGANIZATION_NAMESPACE,
        &[
            ADMINISTER_PERMISSION,
            DELETE_PERMISSION,
            UPDATE_PERMISSION,
            GET_PERMISSION,
            ROLE_MANAGE_PERMISSION,
            POLICY_MANAGE_PERMISSION,
            PROJECT_LIST_PERMISSION,
            GROUP_LIST_PERMISSION,
            PROJECT_CREATE_PERMISSION,
            GROUP_CREATE_PERMISSION,
            "invitationlist",
            "invitationcreate",
            "serviceusermanage",
        ],
    ),
    (
        PROJECT_NAMESPACE,
        &[
            ADMINISTER_PERMISSION,
            DELETE_PERMISSION,
            UPDATE_PERMISSION,
            GET_PERMISSION,
            POLICY_MANAGE_PERMISSION,
            "resourcelist",
        ],
    ),
    (
        GROUP_NAMESPACE,
        &[
            ADMINISTER_PERMISSION,
            DELETE_PERMISSION,
            UPDATE_PERMISSION,
            GET_PERMISSION,
        ],
    ),
    (PLATFORM_NAMESPACE, &[SUPERUSER_PERMISSION, "check"]),
];

#[derive(Debug, Clone, Copy)]
pub struct RoleDefinition {
    pub name: &'static str,
    pub title: &'static str,
    pub permissions: &'static [&'static str],
    pub scopes: &'static [&'static str],
}

pub const PREDEFINED_ROLES: &[RoleDefinition] = &[
    RoleDefinition {
        name: ROLE_ORGANIZATION_OWNER,
        title: "Organization Owner",
        permissions: &["app_organization_administer"],
        scopes: &[ORGANIZATION_NAMESPACE],
    },
    RoleDefinition {
        name: ROLE_ORGANIZATION_MANAGER,
        title: "Organization Manager",
        permissions: &[
            "app_organization_update",
            "app_organization_get",
            "app_organization_projectcreate",
            "app_organization_projectlist",
            "app_organization_groupcreate",
            "app_organization_grouplist",
            "app_organization_serviceusermanage",
        ],
        scopes: &[ORGANIZATION_NAMESPACE],
    },
    RoleDefinition {
        name: ROLE_ORGANIZATION_ACCESS_MANAGER,
        title: "Organization Access Manager",
        permissions: &[
            "app_organization_invitationcreate",
            "app_organization_invitationlist",
            "app_organization_rolemanage",
            "app_organization_policymanage",
        ],
        scopes: &[ORGANIZATION_NAMESPACE],
    },
    RoleDefinition {
        name: ROLE_ORGANIZATION_VIEWER,
        title: "Organization Viewer",
        permissions: &["app_organization_get"],
        scopes: &[ORGANIZATION_NAMESPACE],
    },
    RoleDefinition {
        name: ROLE_PROJECT_OWNER,
        title: "Project Owner",
        permissions: &["app_project_administer"],
        scopes: &[PROJECT_NAMESPACE],
    },
    RoleDefinition {
        name: ROLE_PROJECT_MANAGER,
        title: "Project Manager",
        permissions: &[
            "app_project_update",
            "app_project_get",
            "app_project_resourcelist",
            "app_organization_projectcreate",
            "app_organization_projectlist",
            "app_organization_grouplist",
        ],
        scopes: &[PROJECT_NAMESPACE],
    },
    RoleDefinition {
        name: ROLE_PROJECT_VIEWER,
        title: "Project Viewer",
        permissions: &["app_project_get"],
        scopes: &[PROJECT_NAMESPACE],
    },
    RoleDefinition {
        name: ROLE_GROUP_OWNER,
        title: "Group Owner",
        permissions: &["app_group_administer"],
        scopes: &[GROUP_NAMESPACE],
    },
    RoleDefinition {
        name: ROLE_GROUP_MEMBER,
        title: "Group Member",
        permissions: &["app_group_get"],
        scopes: &[GROUP_NAMESPACE],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_and_keys() {
        assert_eq!(permission_slug("app/project", "get"), "app_project_get");
        assert_eq!(permission_slug("org", "update"), "app_organization_update");
        assert_eq!(permission_slug("compute", "read"), "compute_default_read");
        assert_eq!(permission_key("app/group", "get"), "app.group.get");
        assert_eq!(
            namespace_and_name_from_key("compute.instance.start"),
            Some(("compute/instance".to_string(), "start".to_string()))
        );
        assert_eq!(namespace_and_name_from_key("compute.start"), None);
    }

    #[test]
    fn permission_names_are_alphanumeric() {
        assert!(is_valid_permission_name("start"));
        assert!(is_valid_permission_name("Start2"));
        assert!(!is_valid_permission_name(""));
        assert!(!is_valid_permission_name("re-start"));
        assert!(!is_valid_permission_name("re_start"));
    }

    #[test]
    fn predefined_roles_only_reference_base_permissions() {
        let base: Vec<String> = BASE_PERMISSIONS
            .iter()
            .flat_map(|(namespace, verbs)| verbs.iter().map(|verb| permission_slug(namespace, verb)))
            .collect();
        for role in PREDEFINED_ROLES {
            for permission in role.permissions {
                assert!(
                    base.iter().any(|slug| slug == permission),
                    "{} references unknown permission {permission}",
                    role.name
                );
            }
        }
    }
}
