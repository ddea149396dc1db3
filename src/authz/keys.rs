//! Resource identifiers and the permission-key map used to display
//! batch-check results.
//!
//! A batch check answers a list of `(permission, resource)` pairs. Clients fold
//! those answers into a map keyed by `"{permission}::{namespace}:{id}"` and ask
//! [`should_show`] whether a given control may be rendered.

use super::schema::parse_namespace_alias;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("bad namespace, format should namespace:uuid")]
    BadNamespace,
}

/// A namespaced object, such as `app/organization:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Resource {
    pub namespace: String,
    pub id: String,
}

impl Resource {
    pub fn new(namespace: &str, id: impl Into<String>) -> Self {
        Self {
            namespace: parse_namespace_alias(namespace).to_string(),
            id: id.into(),
        }
    }

    /// Parses `namespace:id`, resolving namespace aliases.
    ///
    /// # Errors
    /// Returns [`ResourceError::BadNamespace`] unless the input has exactly one `:`.
    pub fn parse(value: &str) -> Result<Self, ResourceError> {
        let parts: Vec<&str> = value.split(':').collect();
        match parts.as_slice() {
            [namespace, id] if !namespace.is_empty() && !id.is_empty() => {
                Ok(Self::new(namespace, *id))
            }
            _ => Err(ResourceError::BadNamespace),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

impl FromStr for Resource {
    type Err = ResourceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// One checked pair: the permission, the resource string, and the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckPair {
    pub permission: String,
    pub resource: String,
    pub status: bool,
}

/// `update` + `app/organization:42` → `update::app/organization:42`
#[must_use]
pub fn permission_key(permission: &str, resource: &str) -> String {
    format!("{permission}::{resource}")
}

/// Folds batch-check results into a map keyed by [`permission_key`].
/// Later pairs for the same key overwrite earlier ones.
#[must_use]
pub fn format_permissions(pairs: &[CheckPair]) -> BTreeMap<String, bool> {
    pairs
        .iter()
        .map(|pair| (permission_key(&pair.permission, &pair.resource), pair.status))
        .collect()
}

/// True only when `key` is present and granted.
#[must_use]
pub fn should_show(permissions: &BTreeMap<String, bool>, key: &str) -> bool {
    permissions.get(key).copied().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_resolves_aliases() {
        let resource = Resource::parse("org:42").unwrap();
        assert_eq!(resource.namespace, "app/organization");
        assert_eq!(resource.id, "42");
        assert_eq!(resource.to_string(), "app/organization:42");

        let resource: Resource = "compute/instance:vm-1".parse().unwrap();
        assert_eq!(resource.namespace, "compute/instance");
    }

    #[test]
    fn parse_requires_exactly_one_separator() {
        assert_eq!(Resource::parse("app/project"), Err(ResourceError::BadNamespace));
        assert_eq!(Resource::parse("a:b:c"), Err(ResourceError::BadNamespace));
        assert_eq!(Resource::parse(":id"), Err(ResourceError::BadNamespace));
    }

    #[test]
    fn formatted_keys_drive_visibility() {
        let org = "app/organization:5f2c";
        let pairs = vec![
            CheckPair {
                permission: "update".to_string(),
                resource: org.to_string(),
                status: true,
            },
            CheckPair {
                permission: "delete".to_string(),
                resource: org.to_string(),
                status: false,
            },
        ];
        let map = format_permissions(&pairs);

        assert_eq!(map.len(), 2);
        assert!(should_show(&map, &permission_key("update", org)));
        assert!(!should_show(&map, &permission_key("delete", org)));
        assert!(!should_show(&map, &permission_key("get", org)));
        assert!(map.contains_key("update::app/organization:5f2c"));
    }
}
