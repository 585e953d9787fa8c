//! Pipeline files loaded from disk.

mod common;

use std::io::Write;

use power_model::config::{load_pipeline, ConfigError};

#[test]
fn test_load_pipeline_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(common::pipeline_yaml(dir.path()).as_bytes())
        .unwrap();

    let config = load_pipeline(file.path()).unwrap();
    assert_eq!(config.prometheus.url, "http://localhost:9090");
    assert_eq!(config.train.path, dir.path());
    assert_eq!(config.train.target, "node_power");
    assert_eq!(config.train.step, "15s");
    assert_eq!(config.train.seed, Some(7));
    assert_eq!(config.model_names(), vec!["linear", "xgboost"]);
    assert_eq!(
        config.pipeline("full").unwrap().feature_names(),
        vec!["cpu_freq", "cpu_util"]
    );
}

#[test]
fn test_missing_file_names_path() {
    let err = load_pipeline(std::path::Path::new("/nonexistent/pipeline.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("/nonexistent/pipeline.yaml"));
}

#[test]
fn test_duplicate_pipeline_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let text = common::pipeline_yaml(dir.path()).replace("name: freq", "name: full");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();

    assert!(matches!(
        load_pipeline(file.path()),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_window_must_be_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let text = common::pipeline_yaml(dir.path())
        .replace("2024-06-01T11:00:00Z", "2024-06-01T09:00:00Z");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();

    assert!(load_pipeline(file.path()).is_err());
}
