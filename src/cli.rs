//! CLI argument parsing for gwtmetrics

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for inspection results
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "gwtmetrics")]
#[command(version)]
#[command(about = "Collate GWT lightweight-metrics events and recover names from compiled GWT modules", long_about = None)]
pub struct Cli {
    /// Enable debug logging to stderr
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collate a newline-delimited JSON stream of stats events
    Collate {
        /// Reporting sink: firebug, yui, anything else discards (case-insensitive)
        #[arg(short, long, default_value = "firebug")]
        logger: String,

        /// Event stream file (default: stdin)
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Host snapshot; events are delivered through the hooks installed in it
        #[arg(short, long, value_name = "FILE")]
        snapshot: Option<PathBuf>,

        /// TOML collator configuration
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Override the operation timeout
        #[arg(long = "timeout-ms", value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Override the sweep interval
        #[arg(long = "sweep-interval-ms", value_name = "MS")]
        sweep_interval_ms: Option<u64>,
    },

    /// List recovered RPC methods and classes from a host snapshot
    Inspect {
        /// Host snapshot (JSON)
        #[arg(short, long, value_name = "FILE")]
        snapshot: PathBuf,

        /// Output format
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Resolve a runtime type id to a class name
    TypeId {
        /// Host snapshot (JSON)
        #[arg(short, long, value_name = "FILE")]
        snapshot: PathBuf,

        /// Type id to look up
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },

    /// Describe one RPC method by its compiled identifier
    Deobfuscate {
        /// Host snapshot (JSON)
        #[arg(short, long, value_name = "FILE")]
        snapshot: PathBuf,

        /// Compiled identifier of the method
        name: String,

        /// Output format
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },
}
