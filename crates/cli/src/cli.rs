//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// gridrep - replication rounds over a group transport
#[derive(Parser, Debug)]
#[command(
    name = "gridrep",
    author,
    version,
    about = "Replication dispatcher for an in-memory data grid",
    long_about = "Sends commands to cluster members and collects their answers.\n\n\
                  Validates and inspects dispatcher configuration, and runs \n\
                  replication rounds against an in-process loopback cluster."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "GRIDREP_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "GRIDREP_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this port
    #[arg(long, global = true, env = "GRIDREP_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration file
    Validate(ValidateArgs),

    /// Display effective configuration
    Info(InfoArgs),

    /// Run replication rounds against a loopback cluster
    Simulate(SimulateArgs),
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "gridrep.toml", env = "GRIDREP_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "gridrep.toml", env = "GRIDREP_CONFIG")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `simulate` command
#[derive(Parser, Debug, Clone)]
pub struct SimulateArgs {
    /// Configuration file (defaults are used when omitted)
    #[arg(short, long, env = "GRIDREP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of remote members
    #[arg(short, long, default_value = "3")]
    pub nodes: usize,

    /// Delivery mode of each round
    #[arg(short, long, value_enum, default_value = "all")]
    pub mode: SimMode,

    /// Index of a member that answers slowly
    #[arg(long)]
    pub slow_node: Option<usize>,

    /// Delay of the slow member in milliseconds
    #[arg(long, default_value = "2000")]
    pub slow_ms: u64,

    /// Per-round timeout in milliseconds (configuration default when omitted)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Let the first member request a replay and the last one ignore the first attempt
    #[arg(long)]
    pub replay: bool,

    /// Number of rounds to run
    #[arg(long, default_value = "1")]
    pub rounds: u32,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Delivery mode selectable from the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimMode {
    /// Queue the round on the background worker and do not wait
    Async,
    /// Wait for every member
    All,
    /// Return the first member answer carrying a value
    First,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
