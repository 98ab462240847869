//! Configuration layering: defaults, then TOML, then `CC_` environment.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use codeclone::{CloneSearcher, IndexKind, InMemoryMetadataStore, Settings, SharedVectorIndex};
use tempfile::TempDir;

use crate::common::HashEmbedder;

// Loading reads the process environment, which one test mutates
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_guard() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn test_missing_file_yields_defaults() {
    let _env = env_guard();
    let temp_dir = TempDir::new().unwrap();
    let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings.index.kind, IndexKind::ClusteredQuantized);
    assert_eq!(settings.query.max_results, 100);
    assert!(settings.query.exclude_self);
}

#[test]
fn test_env_beats_file_beats_defaults() {
    let _env = env_guard();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.toml");
    fs::write(
        &path,
        r#"
[index]
kind = "Flat"
dimension = 128

[query]
max_results = 25
default_similarity = 0.8
"#,
    )
    .unwrap();

    unsafe {
        std::env::set_var("CC_QUERY__MAX_RESULTS", "7");
    }
    let settings = Settings::load_from(&path).unwrap();
    unsafe {
        std::env::remove_var("CC_QUERY__MAX_RESULTS");
    }

    assert_eq!(settings.query.max_results, 7);
    assert!((settings.query.default_similarity - 0.8).abs() < 1e-6);
    assert_eq!(settings.index.kind, IndexKind::Exact);
    assert_eq!(settings.index.dimension, 128);
    assert_eq!(settings.embedding.batch_size, 32);
    assert!(settings.validate().is_ok());

    let config = settings.index.index_configuration();
    assert_eq!(config.kind, IndexKind::Exact);
    assert_eq!(config.dimension, 128);
}

#[test]
fn test_saved_settings_drive_searcher_defaults() {
    let _env = env_guard();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cfg").join("settings.toml");

    let mut settings = Settings::default();
    settings.query.default_similarity = 0.7;
    settings.query.max_results = 3;
    settings.metadata.database_path = PathBuf::from("clones.db");
    settings.save(&path).unwrap();

    let loaded = Settings::load_from(&path).unwrap();
    assert_eq!(loaded.metadata.database_path, PathBuf::from("clones.db"));

    let searcher = CloneSearcher::from_settings(
        &loaded,
        SharedVectorIndex::empty(),
        Arc::new(HashEmbedder::new(8)),
        Arc::new(InMemoryMetadataStore::new()),
    );
    assert_eq!(searcher.defaults().max_results, 3);
    assert!((searcher.defaults().default_similarity - 0.7).abs() < 1e-6);
}

#[test]
fn test_invalid_values_fail_validation() {
    let _env = env_guard();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.toml");
    fs::write(&path, "[query]\ndefault_similarity = 1.4\n").unwrap();

    let settings = Settings::load_from(&path).unwrap();
    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("default_similarity"));
}

#[test]
fn test_malformed_toml_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.toml");
    fs::write(&path, "[index\nkind = ").unwrap();
    assert!(Settings::load_from(&path).is_err());
}
