//! The `--verbose` flag and `FRONTIER_LOG_LEVEL`.
//!
//! Both end up as one verbosity count: every `-v` adds one, and the
//! environment variable takes a level name or its index in [`LEVELS`].

use clap::{Arg, ArgAction, Command, builder::ValueParser};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names by verbosity count. A count of 0 leaves the default filter alone.
pub const LEVELS: [(&str, Option<Level>); 5] = [
    ("error", None),
    ("warn", Some(Level::WARN)),
    ("info", Some(Level::INFO)),
    ("debug", Some(Level::DEBUG)),
    ("trace", Some(Level::TRACE)),
];

/// Resolves a verbosity count, saturating at `trace`.
#[must_use]
pub const fn level(verbosity: u8) -> Option<Level> {
    let index = verbosity as usize;
    if index < LEVELS.len() {
        LEVELS[index].1
    } else {
        Some(Level::TRACE)
    }
}

fn parse_verbosity(value: &str) -> Result<u8, String> {
    let value = value.trim().to_ascii_lowercase();
    let index = match value.parse::<usize>() {
        Ok(index) => Some(index).filter(|index| *index < LEVELS.len()),
        Err(_) => LEVELS.iter().position(|(name, _)| *name == value),
    };
    index
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| format!("invalid log level {value:?}"))
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(parse_verbosity)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let names: Vec<String> = LEVELS.iter().map(|(name, _)| name.to_uppercase()).collect();
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help(format!("Verbosity level: {} (default: ERROR)", names.join(", ")))
            .env("FRONTIER_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_indexes_parse() {
        assert_eq!(parse_verbosity("error"), Ok(0));
        assert_eq!(parse_verbosity(" DEBUG "), Ok(3));
        assert_eq!(parse_verbosity("4"), Ok(4));
        assert!(parse_verbosity("5").is_err());
        assert!(parse_verbosity("verbose").is_err());
    }

    #[test]
    fn counts_map_to_levels() {
        assert_eq!(level(0), None);
        assert_eq!(level(1), Some(Level::WARN));
        assert_eq!(level(2), Some(Level::INFO));
        assert_eq!(level(3), Some(Level::DEBUG));
        assert_eq!(level(4), Some(Level::TRACE));
        assert_eq!(level(9), Some(Level::TRACE));
    }
}
