use crate::cli::{
    actions::{Action, server::Args},
    commands::{ARG_DSN, ARG_MAX_CONNECTIONS, ARG_PORT, access},
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let max_connections = matches
        .get_one::<u32>(ARG_MAX_CONNECTIONS)
        .copied()
        .unwrap_or(5);

    let identity_header = matches
        .get_one::<String>(access::ARG_IDENTITY_HEADER)
        .cloned()
        .context("missing required argument: --identity-header")?;
    let superusers = matches
        .get_many::<String>(access::ARG_SUPERUSERS)
        .map(|values| {
            values
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let cors_origin = matches.get_one::<String>(access::ARG_CORS_ORIGIN).cloned();

    Ok(Action::Server(Args {
        port,
        dsn: SecretString::from(dsn),
        max_connections,
        identity_header,
        superusers,
        cors_origin,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    #[test]
    fn builds_server_args() {
        let matches = commands::new().get_matches_from(vec![
            "frontier",
            "--dsn",
            "memory://",
            "--superusers",
            " root@acme.test ,,ops@acme.test",
        ]);
        let Action::Server(args) = handler(&matches).unwrap();
        assert_eq!(args.dsn.expose_secret(), "memory://");
        assert_eq!(args.superusers, vec!["root@acme.test", "ops@acme.test"]);
        assert_eq!(args.identity_header, "x-frontier-email");
        assert!(args.cors_origin.is_none());
    }
}
