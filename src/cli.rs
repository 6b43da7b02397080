// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! NOTE: this expects `clap` to be built with the `derive` feature, e.g.:
//! `clap = { version = "4.5", features = ["derive"] }` in `Cargo.toml`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `batchdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "batchdag",
    version,
    about = "Schedule batch transaction loads by dependency graph.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the job definition file (TOML).
    ///
    /// Default: `Batchdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Batchdag.toml")]
    pub job: String,

    /// Validate the job, print the execution plan, but don't execute.
    #[arg(long)]
    pub plan: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BATCHDAG_LOG` or a default level will be used.
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
