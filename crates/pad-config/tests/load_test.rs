//! Loading padscript.yaml from disk

use std::fs;
use std::path::PathBuf;

use pad_config::{BackendKind, ConfigError, PadConfig};
use tempfile::TempDir;

#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let config = PadConfig::load(dir.path().join("padscript.yaml")).unwrap();
    assert_eq!(config, PadConfig::default());
}

#[test]
fn test_load_with_include_and_relative_external_dir() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("backend.yaml"),
        "kind: threeds\nhost: 192.168.1.20\nport: 4951\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("padscript.yaml"),
        "backend: !include backend.yaml\nexternal:\n  dir: scripts\n  interpreter: python3.12\nlogging:\n  filter: debug\n",
    )
    .unwrap();

    let config = PadConfig::load(dir.path().join("padscript.yaml")).unwrap();
    assert_eq!(config.backend.kind, BackendKind::ThreeDs);
    assert_eq!(config.backend.host.as_deref(), Some("192.168.1.20"));
    assert_eq!(config.backend.port, 4951);
    assert_eq!(config.external.dir, dir.path().join("scripts"));
    assert_eq!(config.external.interpreter, "python3.12");
    assert_eq!(config.logging.filter, "debug");
}

#[test]
fn test_absolute_external_dir_is_kept() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("padscript.yaml"),
        "external:\n  dir: /opt/pad/scripts\n",
    )
    .unwrap();
    let config = PadConfig::load(dir.path().join("padscript.yaml")).unwrap();
    assert_eq!(config.external.dir, PathBuf::from("/opt/pad/scripts"));
}

#[test]
fn test_invalid_file_reports_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("padscript.yaml");
    fs::write(&path, "backend: [unclosed\n").unwrap();

    match PadConfig::load(&path) {
        Err(ConfigError::ParseYaml { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected ParseYaml, got {other:?}"),
    }
}
