//! Configuration loading

use super::merge::merge_policy;
use super::sources::{environment, site_file};
use super::SiteConfig;
use config::{ConfigError, File};
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a site: defaults, site files, then environment variables
    pub fn load(site_root: &Path) -> Result<SiteConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults(site_root)?;
        let builder = site_file::add_to_builder(builder, site_root)?;
        let builder = environment::add_to_builder(builder);
        builder.build()?.try_deserialize()
    }

    /// Load a single config file on top of the defaults
    pub fn load_from_file(path: &Path) -> Result<SiteConfig, ConfigError> {
        let site_root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        merge_policy::builder_with_defaults(site_root)?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()
    }
}
