//! Merge rules: defaults and override order.
//!
//! Later sources win: defaults, site file, environment file, environment variables.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;
use std::path::Path;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults(site_root: &Path) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("site_root", site_root.to_string_lossy().to_string())?
        .set_default("public_dir", "public")?
        .set_default("cache_dir", ".cache")?
        .set_default("content_dir", "content")?
        .set_default("mode", "build")
}
