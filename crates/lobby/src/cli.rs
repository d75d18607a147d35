//! Command-line interface handling for the lobby server.
//!
//! This module provides command-line argument parsing using the `clap`
//! crate. Every flag overrides the matching setting from the config file.

use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the per-connection send queue capacity
    pub queue_capacity: Option<usize>,
}

impl CliArgs {
    /// Parses the process arguments.
    ///
    /// Exits with a usage message if the arguments are invalid.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list, as used by tests.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            queue_capacity: matches.get_one::<usize>("queue-capacity").copied(),
        }
    }
}

fn command() -> Command {
    Command::new("Lobby Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time game lobby server with room broadcast")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 127.0.0.1:8080)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("queue-capacity")
                .long("queue-capacity")
                .value_name("MESSAGES")
                .help("Pending outbound messages allowed per connection before dropping")
                .value_parser(value_parser!(usize)),
        )
}
