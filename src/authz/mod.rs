//! Authorization: the caller identity, namespace naming, and the check engine.

pub mod engine;
pub mod keys;
pub mod schema;

pub use engine::{check, require};
pub use keys::{CheckPair, Resource, ResourceError};

use crate::domain::user::User;
use uuid::Uuid;

/// The caller as asserted by the identity header, before a user row is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Lowercased email from the identity header.
    pub email: String,
    pub superuser: bool,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    /// Configured superusers pass every check.
    pub superuser: bool,
}

impl Principal {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    /// The policy principal that stands for this user.
    #[must_use]
    pub fn subject(&self) -> Resource {
        Resource::new(schema::USER_PRINCIPAL, self.user.id.to_string())
    }
}
