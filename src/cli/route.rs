//! CLI route: single route table and run context. Dispatches to the build driver and presentation.

use crate::cli::parse::{Commands, OutputFormat};
use crate::cli::presentation::{
    format_build_report_json, format_build_report_text, format_status_json, format_status_text,
    SiteStatus,
};
use crate::config::{BuildMode, ConfigLoader, SiteConfig};
use crate::error::BuildError;
use crate::pipeline::BuildDriver;
use crate::state::SiteState;
use crate::store::SledStateStore;
use crate::watch::{WatchDaemon, WatchOptions};
use crate::worker::child;
use std::path::PathBuf;
use tracing::{info, warn};

/// Runtime context for CLI execution: the loaded site configuration.
pub struct RunContext {
    config: SiteConfig,
}

impl RunContext {
    /// Load configuration from an explicit file or by layering the site root's files
    pub fn new(site_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, BuildError> {
        let mut config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&site_root)?,
        };
        config.site_root = site_root;
        config.validate().map_err(|errors| {
            BuildError::Config(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;
        Ok(RunContext { config })
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Run a command; the returned text is printed on stdout
    pub async fn execute(&self, command: &Commands) -> Result<String, BuildError> {
        match command {
            Commands::Build { clean, format } => self.build(*clean, *format).await,
            Commands::Watch { debounce_ms } => self.watch(*debounce_ms).await,
            Commands::Status { format } => self.status(*format),
            Commands::Worker => {
                child::run_stdio(&self.config).await?;
                Ok(String::new())
            }
        }
    }

    async fn build(&self, clean: bool, format: OutputFormat) -> Result<String, BuildError> {
        let config = SiteConfig {
            mode: BuildMode::Build,
            ..self.config.clone()
        };
        let driver = BuildDriver::open(config).await?;
        if clean {
            driver.reset()?;
        }
        let result = driver.run_pass().await;
        driver.shutdown().await;
        let report = result?;
        match format {
            OutputFormat::Text => Ok(format_build_report_text(&report)),
            OutputFormat::Json => format_build_report_json(&report),
        }
    }

    async fn watch(&self, debounce_ms: u64) -> Result<String, BuildError> {
        let config = SiteConfig {
            mode: BuildMode::Watch,
            ..self.config.clone()
        };
        let options = WatchOptions {
            debounce_ms,
            ..WatchOptions::new(config.content_path())
        };
        let daemon = WatchDaemon::new(BuildDriver::open(config).await?, options);

        let cancel = daemon.cancel_token();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupted, stopping watch mode"),
                Err(e) => warn!(error = %e, "Cannot listen for interrupts"),
            }
            cancel.cancel();
        });

        daemon.run().await?;
        Ok("Watch mode stopped".to_string())
    }

    fn status(&self, format: OutputFormat) -> Result<String, BuildError> {
        let db = SledStateStore::new(self.config.state_path())?;
        let status = SiteStatus::from_state(&SiteState::load(&db)?);
        match format {
            OutputFormat::Text => Ok(format_status_text(&status)),
            OutputFormat::Json => format_status_json(&status),
        }
    }
}
