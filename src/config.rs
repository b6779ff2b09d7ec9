//! Configuration System
//!
//! Site configuration with layered sources: built-in defaults, `sitegraph.toml` at the
//! site root, `config/<SITEGRAPH_ENV>.toml`, then `SITEGRAPH__*` environment variables.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

mod loader;
mod merge;
mod sources;

pub use loader::ConfigLoader;

/// Build mode: query errors abort a one-shot build but are only reported while watching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Build,
    Watch,
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_root")]
    pub site_root: PathBuf,

    /// Output directory, relative to the site root
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,

    /// Cache directory (state database, derived artifacts), relative to the site root
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Content directory read by the built-in JSON source
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,

    #[serde(default)]
    pub path_prefix: String,

    #[serde(default)]
    pub prefix_paths: bool,

    #[serde(default)]
    pub mode: BuildMode,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub writer: WriterConfig,

    #[serde(default)]
    pub workers: WorkerPoolConfig,

    #[serde(default)]
    pub schema: SchemaConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_site_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache")
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("content")
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            site_root: default_site_root(),
            public_dir: default_public_dir(),
            cache_dir: default_cache_dir(),
            content_dir: default_content_dir(),
            path_prefix: String::new(),
            prefix_paths: false,
            mode: BuildMode::default(),
            scheduler: SchedulerConfig::default(),
            writer: WriterConfig::default(),
            workers: WorkerPoolConfig::default(),
            schema: SchemaConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Queries executed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Page artifacts written concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of resolver worker processes
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a field resolution or worker RPC may wait for its reply
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Worker executable; defaults to this binary's `worker` subcommand
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Resolve worker fields inside the main process instead of spawning workers
    #[serde(default)]
    pub in_process: bool,
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

fn default_rpc_timeout_ms() -> u64 {
    30_000
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            program: None,
            in_process: false,
        }
    }
}

/// Type inference settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Per-type fields whose shape never counts as a structural change
    #[serde(default = "default_volatile_fields")]
    pub volatile_fields: BTreeMap<String, Vec<String>>,

    /// Fields never inferred on any type
    #[serde(default = "default_ignore_fields")]
    pub ignore_fields: Vec<String>,

    /// Node type -> resolver plugins whose worker fields it gets
    #[serde(default)]
    pub resolvers: BTreeMap<String, Vec<String>>,
}

fn default_volatile_fields() -> BTreeMap<String, Vec<String>> {
    let mut fields = BTreeMap::new();
    fields.insert(
        "Directory".to_string(),
        vec![
            "accessTime".to_string(),
            "atimeMs".to_string(),
            "atime".to_string(),
        ],
    );
    fields
}

fn default_ignore_fields() -> Vec<String> {
    vec!["$loki".to_string()]
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            volatile_fields: default_volatile_fields(),
            ignore_fields: default_ignore_fields(),
            resolvers: BTreeMap::new(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Paths(String),
    Scheduler(String),
    Writer(String),
    Workers(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Paths(msg) => write!(f, "Paths: {}", msg),
            ValidationError::Scheduler(msg) => write!(f, "Scheduler: {}", msg),
            ValidationError::Writer(msg) => write!(f, "Writer: {}", msg),
            ValidationError::Workers(msg) => write!(f, "Workers: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl SiteConfig {
    /// Validate the entire configuration, collecting every problem
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (name, path) in [
            ("public_dir", &self.public_dir),
            ("cache_dir", &self.cache_dir),
            ("content_dir", &self.content_dir),
        ] {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError::Paths(format!("{} cannot be empty", name)));
            }
        }
        if self.scheduler.concurrency == 0 {
            errors.push(ValidationError::Scheduler(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.writer.concurrency == 0 {
            errors.push(ValidationError::Writer(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.workers.pool_size == 0 {
            errors.push(ValidationError::Workers(
                "pool_size must be greater than 0".to_string(),
            ));
        }
        if self.workers.rpc_timeout_ms == 0 {
            errors.push(ValidationError::Workers(
                "rpc_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn public_path(&self) -> PathBuf {
        self.site_root.join(&self.public_dir)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.site_root.join(&self.cache_dir)
    }

    pub fn content_path(&self) -> PathBuf {
        self.site_root.join(&self.content_dir)
    }

    pub fn state_path(&self) -> PathBuf {
        self.cache_path().join("state")
    }

    /// Path prefix that applies to generated URLs; empty unless prefixing is on
    pub fn effective_path_prefix(&self) -> &str {
        if self.prefix_paths {
            &self.path_prefix
        } else {
            ""
        }
    }
}
