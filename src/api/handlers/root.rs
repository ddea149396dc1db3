use axum::response::IntoResponse;

/// Plain-text banner for `GET /`.
pub async fn root() -> impl IntoResponse {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
