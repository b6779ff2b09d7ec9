//! CLI parse: clap types for sitegraph. No behavior; definitions only.

use crate::logging::{LogFormat, LogOutput};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// sitegraph - incremental static-site build core
#[derive(Parser)]
#[command(name = "sitegraph")]
#[command(about = "Incremental content graph and query builds for static sites")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Site root directory
    #[arg(long, default_value = ".", global = true)]
    pub site_root: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false", global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    /// Log output
    #[arg(long, value_enum, global = true)]
    pub log_output: Option<LogOutput>,

    /// Log file path (if output is "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one incremental build pass
    Build {
        /// Forget all saved state first
        #[arg(long)]
        clean: bool,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Build, then rebuild on every content change
    Watch {
        /// Quiet period in milliseconds before a rebuild
        #[arg(long, default_value = "100")]
        debounce_ms: u64,
    },
    /// Show the saved build state
    Status {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Serve field resolution over stdin/stdout (started by the worker pool)
    #[command(hide = true)]
    Worker,
}
