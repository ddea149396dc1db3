//! Caller identity and browser access.

use crate::api::DEFAULT_IDENTITY_HEADER;
use clap::{Arg, Command};

pub const ARG_IDENTITY_HEADER: &str = "identity-header";
pub const ARG_SUPERUSERS: &str = "superusers";
pub const ARG_CORS_ORIGIN: &str = "cors-origin";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_IDENTITY_HEADER)
                .long(ARG_IDENTITY_HEADER)
                .help("Header carrying the authenticated caller's email")
                .long_help(
                    "Header carrying the authenticated caller's email. It must be set by a trusted proxy in front of the service.",
                )
                .default_value(DEFAULT_IDENTITY_HEADER)
                .env("FRONTIER_IDENTITY_HEADER"),
        )
        .arg(
            Arg::new(ARG_SUPERUSERS)
                .long(ARG_SUPERUSERS)
                .help("Comma separated emails that bypass every permission check")
                .env("FRONTIER_SUPERUSERS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_CORS_ORIGIN)
                .long(ARG_CORS_ORIGIN)
                .help("Browser origin allowed to call the API, example: https://console.example.com")
                .env("FRONTIER_CORS_ORIGIN"),
        )
}
