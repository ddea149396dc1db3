//! Preferences: named values attached to the platform, an organization or a
//! user, each validated against a trait from a fixed catalogue.

use super::{ServiceError, audit};
use crate::{
    authz::{
        self, Principal, Resource,
        schema::{
            GET_PERMISSION, ORGANIZATION_NAMESPACE, PLATFORM_ID, PLATFORM_NAMESPACE,
            UPDATE_PERMISSION, USER_PRINCIPAL,
        },
    },
    store::Store,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

pub const DISABLE_ORGS_ON_CREATE: &str = "disable_orgs_on_create";
pub const DISABLE_ORGS_LISTING: &str = "disable_orgs_listing";
pub const DISABLE_USERS_LISTING: &str = "disable_users_listing";
pub const INVITE_WITH_ROLES: &str = "invite_with_roles";
pub const INVITE_MAIL_SUBJECT: &str = "invite_mail_template_subject";
pub const INVITE_MAIL_BODY: &str = "invite_mail_template_body";
pub const ORG_SOCIAL_LOGIN: &str = "social_login";
pub const ORG_MAIL_OTP: &str = "mail_otp";
pub const ORG_MAIL_LINK: &str = "mail_link";
pub const USER_FIRST_NAME: &str = "first_name";

const PLATFORM_HEADING: &str = "Platform Settings";
const PLATFORM_SUB_HEADING: &str =
    "Manage platform settings and how it's members interact with the platform.";
const SECURITY_HEADING: &str = "Security";
const SECURITY_SUB_HEADING: &str =
    "Manage organization security and how it's members authenticate.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TraitInput {
    Text,
    Textarea,
    Select,
    Combobox,
    Checkbox,
    Multiselect,
    Number,
}

/// Describes one preference a resource type accepts.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct Trait {
    pub resource_type: &'static str,
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub heading: &'static str,
    pub sub_heading: &'static str,
    pub input: TraitInput,
    /// Comma-separated acceptable values for choice inputs.
    pub input_hints: &'static str,
    pub default: &'static str,
}

impl Trait {
    /// Checks `value` against the trait's input type.
    ///
    /// # Errors
    /// Returns `InvalidArgument` naming the trait when the value does not fit.
    pub fn validate(&self, value: &str) -> Result<(), ServiceError> {
        let hints = || self.input_hints.split(',').map(str::trim);
        let valid = match self.input {
            TraitInput::Text | TraitInput::Textarea => true,
            TraitInput::Checkbox => matches!(value, "true" | "false"),
            TraitInput::Number => value.trim().parse::<f64>().is_ok(),
            TraitInput::Select | TraitInput::Combobox => hints().any(|hint| hint == value),
            TraitInput::Multiselect => value
                .split(',')
                .map(str::trim)
                .all(|item| hints().any(|hint| hint == item)),
        };
        if valid {
            Ok(())
        } else {
            Err(ServiceError::invalid(format!(
                "invalid value for preference {}",
                self.name
            )))
        }
    }
}

const PLATFORM_SECTION: (&str, &str) = (PLATFORM_HEADING, PLATFORM_SUB_HEADING);
const SECURITY_SECTION: (&str, &str) = (SECURITY_HEADING, SECURITY_SUB_HEADING);

const fn checkbox(
    (heading, sub_heading): (&'static str, &'static str),
    resource_type: &'static str,
    name: &'static str,
    title: &'static str,
    description: &'static str,
    default: &'static str,
) -> Trait {
    Trait {
        resource_type,
        name,
        title,
        description,
        heading,
        sub_heading,
        input: TraitInput::Checkbox,
        input_hints: "true,false",
        default,
    }
}

pub static DEFAULT_TRAITS: &[Trait] = &[
    checkbox(
        PLATFORM_SECTION,
        PLATFORM_NAMESPACE,
        DISABLE_ORGS_ON_CREATE,
        "Disable Orgs On Create",
        "If selected the new orgs created by members will be disabled by default.",
        "false",
    ),
    checkbox(
        PLATFORM_SECTION,
        PLATFORM_NAMESPACE,
        DISABLE_ORGS_LISTING,
        "Disable Orgs Listing",
        "If selected will disallow non-admin APIs to list all organizations on the platform.",
        "false",
    ),
    checkbox(
        PLATFORM_SECTION,
        PLATFORM_NAMESPACE,
        DISABLE_USERS_LISTING,
        "Disable Users Listing",
        "If selected will disallow non-admin APIs to list all users on the platform.",
        "false",
    ),
    checkbox(
        PLATFORM_SECTION,
        PLATFORM_NAMESPACE,
        INVITE_WITH_ROLES,
        "Invite With Roles",
        "Allow inviting new members with a set of role ids.",
        "true",
    ),
    Trait {
        resource_type: PLATFORM_NAMESPACE,
        name: INVITE_MAIL_SUBJECT,
        title: "Invite Mail Subject",
        description: "The subject of the invite mail sent to new members.",
        heading: PLATFORM_HEADING,
        sub_heading: PLATFORM_SUB_HEADING,
        input: TraitInput::Text,
        input_hints: "",
        default: "You have been invited to join an organization",
    },
    Trait {
        resource_type: PLATFORM_NAMESPACE,
        name: INVITE_MAIL_BODY,
        title: "Invite Mail Body",
        description: "The body of the invite mail sent to new members.",
        heading: PLATFORM_HEADING,
        sub_heading: PLATFORM_SUB_HEADING,
        input: TraitInput::Textarea,
        input_hints: "",
        default: "<div>Hi {{.UserID}},</div><br><p>You have been invited to join an organization: {{.Organization}}. Login to your account to accept the invitation.</p><br><div>Thanks,<br>Team Frontier</div>",
    },
    Trait {
        resource_type: USER_PRINCIPAL,
        name: USER_FIRST_NAME,
        title: "Full name",
        description: "Full name of the user",
        heading: "Profile",
        sub_heading: "",
        input: TraitInput::Text,
        input_hints: "",
        default: "",
    },
    checkbox(
        SECURITY_SECTION,
        ORGANIZATION_NAMESPACE,
        ORG_SOCIAL_LOGIN,
        "Social Login",
        "Allow login through Google/Github/Facebook/etc single sign-on functionality.",
        "",
    ),
    checkbox(
        SECURITY_SECTION,
        ORGANIZATION_NAMESPACE,
        ORG_MAIL_OTP,
        "Email code",
        "Allow password less login via code delivered over email.",
        "",
    ),
    checkbox(
        SECURITY_SECTION,
        ORGANIZATION_NAMESPACE,
        ORG_MAIL_LINK,
        "Email magic link",
        "Allow password less login via a link delivered over email.",
        "",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Preference {
    /// Nil for values that fall back to the trait default.
    pub id: Uuid,
    pub name: String,
    pub value: String,
    pub resource_type: String,
    pub resource_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PreferenceInput {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetPreferencesRequest {
    #[serde(default)]
    pub bodies: Vec<PreferenceInput>,
}

/// Where a set of preferences lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Platform,
    Organization(Uuid),
    User(Uuid),
}

impl Scope {
    fn resource_type(self) -> &'static str {
        match self {
            Self::Platform => PLATFORM_NAMESPACE,
            Self::Organization(_) => ORGANIZATION_NAMESPACE,
            Self::User(_) => USER_PRINCIPAL,
        }
    }

    fn resource_id(self) -> String {
        match self {
            Self::Platform => PLATFORM_ID.to_string(),
            Self::Organization(id) | Self::User(id) => id.to_string(),
        }
    }
}

/// The trait catalogue, in declaration order.
#[must_use]
pub fn traits() -> &'static [Trait] {
    DEFAULT_TRAITS
}

#[must_use]
pub fn find_trait(resource_type: &str, name: &str) -> Option<&'static Trait> {
    DEFAULT_TRAITS
        .iter()
        .find(|item| item.resource_type == resource_type && item.name == name)
}

/// Stored values merged over trait defaults, in trait order.
async fn load(store: &dyn Store, scope: Scope) -> Result<Vec<Preference>, ServiceError> {
    let resource_type = scope.resource_type();
    let resource_id = scope.resource_id();
    let stored = store.fetch_preferences(resource_type, &resource_id).await?;

    let merged = DEFAULT_TRAITS
        .iter()
        .filter(|item| item.resource_type == resource_type)
        .map(|item| {
            stored
                .iter()
                .find(|preference| preference.name == item.name)
                .cloned()
                .unwrap_or_else(|| Preference {
                    id: Uuid::nil(),
                    name: item.name.to_string(),
                    value: item.default.to_string(),
                    resource_type: resource_type.to_string(),
                    resource_id: resource_id.clone(),
                    created_at: DateTime::<Utc>::UNIX_EPOCH,
                    updated_at: DateTime::<Utc>::UNIX_EPOCH,
                })
        })
        .collect();
    Ok(merged)
}

/// True when the platform preference `name` is set (or defaults) to `"true"`.
///
/// # Errors
/// Returns a store error if preferences cannot be loaded.
pub async fn platform_flag(store: &dyn Store, name: &str) -> Result<bool, ServiceError> {
    let preferences = load(store, Scope::Platform).await?;
    Ok(preferences
        .iter()
        .any(|preference| preference.name == name && preference.value == "true"))
}

async fn authorize(
    store: &dyn Store,
    principal: &Principal,
    scope: Scope,
    write: bool,
) -> Result<(), ServiceError> {
    match scope {
        Scope::Platform if write && !principal.superuser => Err(ServiceError::PermissionDenied),
        Scope::Platform => Ok(()),
        Scope::Organization(org_id) => {
            if store.fetch_org(org_id).await?.is_none() {
                return Err(ServiceError::NotFound("organization"));
            }
            let permission = if write { UPDATE_PERMISSION } else { GET_PERMISSION };
            let org = Resource::new(ORGANIZATION_NAMESPACE, org_id.to_string());
            authz::require(store, principal, permission, &org).await
        }
        Scope::User(user_id) if user_id == principal.id() || principal.superuser => Ok(()),
        Scope::User(_) => Err(ServiceError::PermissionDenied),
    }
}

/// Lists the preferences of `scope`, defaults included.
///
/// # Errors
/// `PermissionDenied` when the caller may not read the scope.
pub async fn list(
    store: &dyn Store,
    principal: &Principal,
    scope: Scope,
) -> Result<Vec<Preference>, ServiceError> {
    authorize(store, principal, scope, false).await?;
    load(store, scope).await
}

/// Validates and stores each input, returning the stored rows.
///
/// # Errors
/// `InvalidArgument` for an unknown trait or a value that fails validation,
/// `PermissionDenied` when the caller may not write the scope.
#[instrument(skip(store, principal, inputs), fields(principal = %principal.id()))]
pub async fn set(
    store: &dyn Store,
    principal: &Principal,
    scope: Scope,
    inputs: Vec<PreferenceInput>,
) -> Result<Vec<Preference>, ServiceError> {
    authorize(store, principal, scope, true).await?;

    let resource_type = scope.resource_type();
    // validate everything before the first write
    for input in &inputs {
        find_trait(resource_type, &input.name)
            .ok_or_else(|| ServiceError::invalid("trait not found"))?
            .validate(&input.value)?;
    }

    let mut stored = Vec::with_capacity(inputs.len());
    for input in inputs {
        let now = Utc::now();
        let preference = Preference {
            id: Uuid::new_v4(),
            name: input.name,
            value: input.value,
            resource_type: resource_type.to_string(),
            resource_id: scope.resource_id(),
            created_at: now,
            updated_at: now,
        };
        stored.push(store.upsert_preference(&preference).await?);
    }

    if let Scope::Organization(org_id) = scope {
        audit::emit(
            store,
            principal,
            audit::EVENT_PREFERENCE_CREATED,
            audit::AuditEntity::new(ORGANIZATION_NAMESPACE, org_id, ""),
            None,
            Some(org_id),
        )
        .await;
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::testing::{principal, seeded_store};

    fn input(name: &str, value: &str) -> PreferenceInput {
        PreferenceInput {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn values_are_validated_by_input_type() {
        let checkbox = find_trait(PLATFORM_NAMESPACE, DISABLE_ORGS_LISTING).unwrap();
        assert!(checkbox.validate("true").is_ok());
        assert!(checkbox.validate("yes").is_err());

        let mut select = *checkbox;
        select.input = TraitInput::Select;
        select.input_hints = "red, green,blue";
        assert!(select.validate("green").is_ok());
        assert!(select.validate("purple").is_err());

        let mut multi = select;
        multi.input = TraitInput::Multiselect;
        assert!(multi.validate("red,blue").is_ok());
        assert!(multi.validate("red,pink").is_err());

        let mut number = select;
        number.input = TraitInput::Number;
        assert!(number.validate("4.5").is_ok());
        assert!(number.validate("four").is_err());
    }

    #[tokio::test]
    async fn defaults_fill_missing_values_in_trait_order() {
        let store = seeded_store().await;
        let admin = principal(store.as_ref(), "admin", true).await;

        set(
            store.as_ref(),
            &admin,
            Scope::Platform,
            vec![input(DISABLE_USERS_LISTING, "true")],
        )
        .await
        .unwrap();

        let values = list(store.as_ref(), &admin, Scope::Platform).await.unwrap();
        let names: Vec<&str> = values.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                DISABLE_ORGS_ON_CREATE,
                DISABLE_ORGS_LISTING,
                DISABLE_USERS_LISTING,
                INVITE_WITH_ROLES,
                INVITE_MAIL_SUBJECT,
                INVITE_MAIL_BODY,
            ]
        );
        assert_eq!(values[2].value, "true");
        assert_ne!(values[2].id, Uuid::nil());
        assert_eq!(values[3].value, "true");
        assert_eq!(values[3].id, Uuid::nil());
        assert!(platform_flag(store.as_ref(), DISABLE_USERS_LISTING).await.unwrap());
        assert!(!platform_flag(store.as_ref(), DISABLE_ORGS_LISTING).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_traits_are_rejected() {
        let store = seeded_store().await;
        let user = principal(store.as_ref(), "alice", false).await;
        let err = set(
            store.as_ref(),
            &user,
            Scope::User(user.id()),
            vec![input("favourite_colour", "green")],
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "trait not found");
    }

    #[tokio::test]
    async fn platform_writes_need_a_superuser() {
        let store = seeded_store().await;
        let user = principal(store.as_ref(), "alice", false).await;
        let err = set(
            store.as_ref(),
            &user,
            Scope::Platform,
            vec![input(DISABLE_ORGS_LISTING, "true")],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied));

        let other = principal(store.as_ref(), "bob", false).await;
        let err = list(store.as_ref(), &user, Scope::User(other.id()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied));
    }
}
