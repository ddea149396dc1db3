use crate::{
    api::{self, AppState},
    cli::telemetry,
    domain::bootstrap,
    store::{Store, memory::MemoryStore, postgres::PgStore},
};
use anyhow::{Context, Result};
use axum::http::HeaderName;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

const MEMORY_DSN_SCHEME: &str = "memory://";

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub max_connections: u32,
    pub identity_header: String,
    pub superusers: Vec<String>,
    pub cors_origin: Option<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store cannot be opened or bootstrapped, or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let identity_header = HeaderName::from_bytes(args.identity_header.trim().as_bytes())
        .with_context(|| format!("Invalid identity header: {}", args.identity_header))?;

    let store = open_store(&args).await?;
    bootstrap::run(store.as_ref())
        .await
        .context("Failed to bootstrap permissions and roles")?;

    let state = AppState::new(store, identity_header, args.superusers);
    let result = api::new(args.port, state, args.cors_origin.as_deref()).await;

    telemetry::shutdown_tracer();
    result
}

async fn open_store(args: &Args) -> Result<Arc<dyn Store>> {
    let dsn = args.dsn.expose_secret();
    if dsn.starts_with(MEMORY_DSN_SCHEME) {
        warn!("Using the in-memory store; data is lost on shutdown");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(args.max_connections)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let store = PgStore::new(pool);
    store
        .apply_schema()
        .await
        .context("Failed to apply database schema")?;

    Ok(Arc::new(store))
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(args.dsn.expose_secret())),
        ("max_connections", args.max_connections.to_string()),
        ("identity_header", args.identity_header.clone()),
        ("superusers", args.superusers.len().to_string()),
        (
            "cors_origin",
            args.cors_origin
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    if dsn.starts_with(MEMORY_DSN_SCHEME) {
        return dsn.to_string();
    }
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", frontier_banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn frontier_banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    FRONTIER_BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

const FRONTIER_BANNER: &str = r"
  |\      |\      |\
  | \     | \     | \
  |  \    |  \    |  \
 _|___\___|___\___|___\_  F R O N T I E R {VERSION}";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_password_only() {
        assert_eq!(
            redact_dsn("postgres://frontier:s3cret@db:5432/frontier"),
            "postgres://frontier:REDACTED@db:5432/frontier"
        );
        assert_eq!(
            redact_dsn("postgres://db:5432/frontier"),
            "postgres://db:5432/frontier"
        );
        assert_eq!(redact_dsn("memory://"), "memory://");
        assert_eq!(redact_dsn("::not a url::"), "invalid-dsn");
    }

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit(" abc "), "abc");
    }

    #[tokio::test]
    async fn memory_dsn_opens_memory_store() {
        let args = Args {
            port: 0,
            dsn: SecretString::from("memory://"),
            max_connections: 1,
            identity_header: "x-frontier-email".to_string(),
            superusers: Vec::new(),
            cors_origin: None,
        };
        let store = open_store(&args).await.unwrap();
        assert!(store.ping().await.is_ok());
    }
}
