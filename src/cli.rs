//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `sitekit`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sitekit",
    version,
    about = "Build, watch and serve front-end assets.",
    long_about = None
)]
pub struct CliArgs {
    /// Tasks to run, in order (e.g. `prod`, `styles:dev`, `cache:clear`).
    ///
    /// Default: `default`, which starts the webserver and the watch loop.
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,

    /// Path to the config file (TOML). Defaults are used when it is absent.
    #[arg(long, value_name = "PATH", default_value = "Sitekit.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SITEKIT_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
