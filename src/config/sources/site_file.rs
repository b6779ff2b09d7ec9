//! Site config file sources: sitegraph.toml and config/{env}.toml

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::Path;
use tracing::debug;

/// Name of the site-level config file
pub const SITE_CONFIG_FILE: &str = "sitegraph.toml";

/// Add site config files to builder.
/// Precedence: sitegraph.toml (base) then config/{SITEGRAPH_ENV}.toml (env-specific).
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    site_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let env_name = std::env::var("SITEGRAPH_ENV").unwrap_or_else(|_| "development".to_string());

    let mut builder = builder;

    let base_config_path = site_root.join(SITE_CONFIG_FILE);
    if base_config_path.exists() {
        debug!(config_path = %base_config_path.display(), "Loading site config");
        builder = builder.add_source(File::from(base_config_path.as_path()).required(false));
    }

    let env_config_path = site_root.join("config").join(format!("{}.toml", env_name));
    if env_config_path.exists() {
        debug!(config_path = %env_config_path.display(), "Loading environment config");
        builder = builder.add_source(File::from(env_config_path.as_path()).required(false));
    }

    Ok(builder)
}
