//! Tenancy and access-control services.
//!
//! Every service function takes the store and the calling [`Principal`],
//! performs its authorization check through [`crate::authz`], and returns
//! a [`ServiceError`] that the HTTP layer maps onto a status code.
//!
//! [`Principal`]: crate::authz::Principal

pub mod audit;
pub mod bootstrap;
pub mod error;
pub mod group;
pub mod organization;
pub mod permission;
pub mod policy;
pub mod preference;
pub mod project;
pub mod role;
pub mod slug;
pub mod user;

pub use error::ServiceError;

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Free-form JSON object attached to most entities.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Enabled,
    Disabled,
}

impl State {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }

    /// Unknown values read back from storage count as disabled.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "enabled" {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional strings from request bodies, trimmed, with blanks treated as absent.
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the service tests.

    use super::{State, user::User};
    use crate::{
        authz::Principal,
        domain::bootstrap,
        store::{Store, memory::MemoryStore},
    };
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    pub(crate) async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        bootstrap::run(store.as_ref()).await.unwrap();
        store
    }

    pub(crate) async fn principal(store: &dyn Store, name: &str, superuser: bool) -> Principal {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{name}@acme.test"),
            title: name.to_string(),
            avatar: String::new(),
            metadata: super::Metadata::new(),
            state: State::Enabled,
            created_at: now,
            updated_at: now,
        };
        store.insert_user(&user).await.unwrap();
        Principal { user, superuser }
    }
}
