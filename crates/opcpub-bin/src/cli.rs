// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: start the publisher (default)
//! - `validate`: validate the configuration file
//! - `version`: show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// opcpub - OPC UA PubSub writer-group publisher
///
/// Collects samples and events of the configured data-set writers, encodes
/// them into network messages and publishes them to a sink.
#[derive(Parser, Debug)]
#[command(
    name = "opcpub",
    author = "Sylvex <contact@sylvex.io>",
    version = crate::VERSION,
    about = "OPC UA PubSub writer-group publisher",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "opcpub.yaml",
        env = "OPCPUB_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Enable quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the publisher
    ///
    /// This is the default command when no subcommand is specified.
    Run(RunArgs),

    /// Validate the configuration file
    ///
    /// Parses and validates the configuration without starting anything.
    Validate(ValidateArgs),

    /// Show version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `run` command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Poll the configuration file for writer changes every N milliseconds (0 disables)
    #[arg(long, default_value = "2000", env = "OPCPUB_WATCH_INTERVAL_MS")]
    pub watch_interval_ms: u64,

    /// Log a status snapshot every N seconds (0 disables)
    #[arg(long, default_value = "60")]
    pub status_interval_secs: u64,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            watch_interval_ms: 2000,
            status_interval_secs: 60,
        }
    }
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Strict mode: treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

impl From<opcpub_config::LogFormat> for LogFormat {
    fn from(format: opcpub_config::LogFormat) -> Self {
        match format {
            opcpub_config::LogFormat::Text => LogFormat::Text,
            opcpub_config::LogFormat::Json => LogFormat::Json,
            opcpub_config::LogFormat::Compact => LogFormat::Compact,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective command, defaulting to `Run` if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Resolves the log level: quiet/verbose flags, then `--log-level`,
    /// then the configured level.
    pub fn effective_log_level<'a>(&'a self, configured: &'a str) -> &'a str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            self.log_level.as_deref().unwrap_or(configured)
        }
    }

    /// Resolves the log format: `--log-format`, then the configured format.
    pub fn effective_log_format(&self, configured: opcpub_config::LogFormat) -> LogFormat {
        self.log_format.unwrap_or_else(|| configured.into())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["opcpub"]);
        assert!(cli.command.is_none());
        match cli.effective_command() {
            Commands::Run(args) => assert_eq!(args.watch_interval_ms, 2000),
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["opcpub", "run", "--watch-interval-ms", "0"]);
        match cli.command {
            Some(Commands::Run(args)) => assert_eq!(args.watch_interval_ms, 0),
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["opcpub", "validate", "--show-config", "-f", "json"]);
        match cli.command {
            Some(Commands::Validate(args)) => {
                assert!(args.show_config);
                assert_eq!(args.format, OutputFormat::Json);
            }
            other => panic!("expected Validate, got {:?}", other),
        }
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["opcpub", "-c", "/etc/opcpub/line-1.toml", "version"]);
        assert_eq!(cli.config, PathBuf::from("/etc/opcpub/line-1.toml"));
        assert!(matches!(cli.command, Some(Commands::Version)));
    }

    #[test]
    fn test_log_level_precedence() {
        let cli = Cli::parse_from(["opcpub"]);
        assert_eq!(cli.effective_log_level("info"), "info");

        let cli = Cli::parse_from(["opcpub", "-l", "trace"]);
        assert_eq!(cli.effective_log_level("info"), "trace");

        let cli = Cli::parse_from(["opcpub", "-q", "-l", "trace"]);
        assert_eq!(cli.effective_log_level("info"), "warn");

        let cli = Cli::parse_from(["opcpub", "-v"]);
        assert_eq!(cli.effective_log_level("info"), "debug");
    }

    #[test]
    fn test_log_format_precedence() {
        let cli = Cli::parse_from(["opcpub"]);
        assert_eq!(cli.effective_log_format(opcpub_config::LogFormat::Json), LogFormat::Json);

        let cli = Cli::parse_from(["opcpub", "--log-format", "compact"]);
        assert_eq!(cli.effective_log_format(opcpub_config::LogFormat::Json), LogFormat::Compact);
    }
}
