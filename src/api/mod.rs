//! HTTP surface: router assembly, shared state, and the server loop.

pub mod error;
pub(crate) mod handlers;
mod openapi;
pub mod principal;

use crate::store::Store;
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Json, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, options},
};
use handlers::{health, root};
use std::{collections::BTreeSet, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub use openapi::openapi;

pub const DEFAULT_IDENTITY_HEADER: &str = "x-frontier-email";

/// Shared by every handler through an `Extension` layer.
#[derive(Clone, Debug)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// Header carrying the caller's email, set by the authenticating proxy.
    pub identity_header: HeaderName,
    /// Lowercased superuser emails.
    pub superusers: Arc<BTreeSet<String>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        identity_header: HeaderName,
        superusers: impl IntoIterator<Item = String>,
    ) -> Self {
        let superusers = superusers
            .into_iter()
            .map(|email| email.trim().to_lowercase())
            .filter(|email| !email.is_empty())
            .collect();
        Self {
            store,
            identity_header,
            superusers: Arc::new(superusers),
        }
    }
}

#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Builds the full application router with its middleware stack.
///
/// # Errors
/// Returns an error if `cors_origin` is not a valid origin URL.
pub fn app(state: AppState, cors_origin: Option<&str>) -> Result<Router> {
    let mut cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, state.identity_header.clone()])
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE]);
    if let Some(origin) = cors_origin {
        cors = cors
            .allow_origin(AllowOrigin::exact(cors_origin_header(origin)?))
            .allow_credentials(true);
    }

    // OpenAPI-wired routes first, then the undocumented `/`, preflight `OPTIONS /health`
    // and the document itself.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .route("/api-docs/openapi.json", get(|| async { Json(openapi()) }))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state)),
        );

    Ok(app)
}

/// Start the server
/// # Errors
/// Return error if failed to bind or serve
pub async fn new(port: u16, state: AppState, cors_origin: Option<&str>) -> Result<()> {
    let app = app(state, cors_origin)?;

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn cors_origin_header(origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(origin).with_context(|| format!("Invalid CORS origin: {origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("CORS origin must include a valid host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build CORS origin header")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn cors_origin_drops_path_and_keeps_port() {
        let origin = cors_origin_header("https://console.acme.test:8443/app/").unwrap();
        assert_eq!(origin, "https://console.acme.test:8443");
    }

    #[test]
    fn cors_origin_requires_host() {
        assert!(cors_origin_header("not a url").is_err());
    }

    #[test]
    fn superusers_are_normalized() {
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            HeaderName::from_static(DEFAULT_IDENTITY_HEADER),
            [" Admin@Acme.test ".to_string(), String::new()],
        );
        assert_eq!(state.superusers.len(), 1);
        assert!(state.superusers.contains("admin@acme.test"));
    }
}
