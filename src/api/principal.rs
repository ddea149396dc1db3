//! Caller resolution from the identity header set by the fronting proxy.

use super::AppState;
use crate::{
    authz::{Identity, Principal},
    domain::{ServiceError, user},
};
use axum::http::HeaderMap;
use tracing::debug;

/// Reads the identity header; missing or blank headers are `Unauthenticated`.
///
/// # Errors
/// Returns [`ServiceError::Unauthenticated`] when no usable email is present.
pub fn identity(headers: &HeaderMap, state: &AppState) -> Result<Identity, ServiceError> {
    let email = headers
        .get(&state.identity_header)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            debug!("missing identity header {}", state.identity_header);
            ServiceError::Unauthenticated
        })?;
    let superuser = state.superusers.contains(&email);
    Ok(Identity { email, superuser })
}

/// Resolves the request's caller to a stored user.
///
/// # Errors
/// Returns [`ServiceError::Unauthenticated`] when the header is missing or no
/// enabled user matches it.
pub async fn require_auth(headers: &HeaderMap, state: &AppState) -> Result<Principal, ServiceError> {
    let identity = identity(headers, state)?;
    user::resolve_principal(state.store.as_ref(), &identity).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use axum::http::{HeaderName, HeaderValue};
    use std::sync::Arc;

    fn state() -> AppState {
        AppState::new(
            Arc::new(MemoryStore::new()),
            HeaderName::from_static("x-frontier-email"),
            ["root@acme.test".to_string()],
        )
    }

    #[test]
    fn identity_is_lowercased_and_flags_superusers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-frontier-email", HeaderValue::from_static(" Root@Acme.test "));
        let identity = identity(&headers, &state()).unwrap();
        assert_eq!(identity.email, "root@acme.test");
        assert!(identity.superuser);
    }

    #[test]
    fn missing_header_is_unauthenticated() {
        let headers = HeaderMap::new();
        assert!(matches!(
            identity(&headers, &state()),
            Err(ServiceError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn superusers_are_provisioned_on_first_request() {
        let state = state();
        let mut headers = HeaderMap::new();
        headers.insert("x-frontier-email", HeaderValue::from_static("root@acme.test"));
        let principal = require_auth(&headers, &state).await.unwrap();
        assert!(principal.superuser);

        headers.insert("x-frontier-email", HeaderValue::from_static("nobody@acme.test"));
        assert!(matches!(
            require_auth(&headers, &state).await,
            Err(ServiceError::Unauthenticated)
        ));
    }
}
