//! Logging
//!
//! Structured `tracing` output. Level, format and destination come from the `[logging]`
//! table of the site config, CLI flags override them, and `SITEGRAPH_LOG` replaces the
//! whole filter.
//!
//! Worker processes must log to stderr: their stdout carries the RPC channel.

use crate::error::BuildError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Full filter directive, e.g. `sitegraph::query=debug,info`
pub const LOG_FILTER_ENV: &str = "SITEGRAPH_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error or off
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Used when `output` is `file`
    pub file: PathBuf,
    /// ANSI colors for text output on a terminal stream
    pub color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            output: LogOutput::Stdout,
            file: PathBuf::from(".cache/sitegraph.log"),
            color: true,
        }
    }
}

impl LoggingConfig {
    /// Logging disabled; the CLI default unless asked otherwise
    pub fn off() -> Self {
        Self {
            level: "off".to_string(),
            ..Self::default()
        }
    }

    /// The same config, forced onto stderr (for worker processes)
    pub fn for_worker(&self) -> Self {
        Self {
            output: LogOutput::Stderr,
            color: false,
            ..self.clone()
        }
    }

    fn filter(&self) -> Result<EnvFilter, BuildError> {
        if let Ok(filter) = EnvFilter::try_from_env(LOG_FILTER_ENV) {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.level)
            .map_err(|e| BuildError::Config(format!("Invalid log level {:?}: {}", self.level, e)))
    }
}

/// Install the global subscriber
///
/// Calling this twice is an error; the first subscriber stays installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), BuildError> {
    let filter = config.filter()?;
    let writer = match config.output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File => BoxMakeWriter::new(open_log_file(&config.file)?),
    };

    let registry = Registry::default().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(config.color && config.output != LogOutput::File)
                    .with_writer(writer),
            )
            .try_init(),
    };

    result.map_err(|e| BuildError::Config(format!("Failed to install logger: {}", e)))
}

fn open_log_file(path: &PathBuf) -> Result<std::sync::Mutex<std::fs::File>, BuildError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| BuildError::Config(format!("Failed to create log directory: {}", e)))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| BuildError::Config(format!("Failed to open log file {:?}: {}", path, e)))?;
    Ok(std::sync::Mutex::new(file))
}
