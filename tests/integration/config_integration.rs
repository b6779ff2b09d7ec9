//! Integration tests for layered configuration loading

use sitegraph::config::{BuildMode, ConfigLoader, ValidationError};
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_load_without_site_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigLoader::load(temp_dir.path()).unwrap();

    assert_eq!(config.site_root, temp_dir.path());
    assert_eq!(config.public_path(), temp_dir.path().join("public"));
    assert_eq!(config.state_path(), temp_dir.path().join(".cache").join("state"));
    assert_eq!(config.mode, BuildMode::Build);
    assert!(config.validate().is_ok());
}

#[test]
fn test_site_file_overrides_defaults() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join("sitegraph.toml"),
        r#"
public_dir = "dist"
path_prefix = "/blog"
prefix_paths = true

[writer]
concurrency = 2

[workers]
in_process = true
"#,
    )
    .unwrap();

    let config = ConfigLoader::load(temp_dir.path()).unwrap();
    assert_eq!(config.public_dir, PathBuf::from("dist"));
    assert_eq!(config.effective_path_prefix(), "/blog");
    assert_eq!(config.writer.concurrency, 2);
    assert_eq!(config.scheduler.concurrency, 4);
    assert!(config.workers.in_process);
    // untouched tables keep their defaults
    assert!(config.schema.volatile_fields.contains_key("Directory"));
}

#[test]
fn test_load_from_file_roots_site_at_file_directory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("custom.toml");
    std::fs::write(&path, "mode = \"watch\"\ncontent_dir = \"src/content\"\n").unwrap();

    let config = ConfigLoader::load_from_file(&path).unwrap();
    assert_eq!(config.mode, BuildMode::Watch);
    assert_eq!(config.content_path(), temp_dir.path().join("src/content"));
}

#[test]
fn test_invalid_values_fail_validation() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join("sitegraph.toml"),
        "[scheduler]\nconcurrency = 0\n\n[workers]\nrpc_timeout_ms = 0\n",
    )
    .unwrap();

    let config = ConfigLoader::load(temp_dir.path()).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|e| matches!(e, ValidationError::Scheduler(_))));
    assert!(errors.iter().any(|e| matches!(e, ValidationError::Workers(_))));
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "[scheduler\nconcurrency = ").unwrap();
    assert!(ConfigLoader::load_from_file(&path).is_err());
}
