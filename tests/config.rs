use std::fs;

use assert_matches::assert_matches;

use kira_data_registrar::config::{ConfigLoader, DEFAULT_QUERY_URL};
use kira_data_registrar::error::RegistrarError;

#[test]
fn load_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-dr.json");
    fs::write(
        &path,
        r#"{
            "catalog": { "timeout_secs": 5, "retries": 2 },
            "store": { "root": "/srv/kira-dr", "workspace": "Imports", "public": true }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.catalog.query_url, DEFAULT_QUERY_URL);
    assert_eq!(resolved.catalog.timeout.as_secs(), 5);
    assert_eq!(resolved.catalog.retries, 2);
    assert_eq!(resolved.store.root.as_str(), "/srv/kira-dr");
    assert_eq!(resolved.store.workspace, "Imports");
    assert!(resolved.store.public);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(RegistrarError::ConfigRead(_))
    );
}

#[test]
fn invalid_workspace_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-dr.json");
    fs::write(&path, r#"{ "store": { "root": "/srv", "workspace": "a/b" } }"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(RegistrarError::ConfigurationError(_))
    );
}

#[test]
fn malformed_config_is_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-dr.json");
    fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(RegistrarError::ConfigParse(_))
    );
}
