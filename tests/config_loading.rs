//! Tests for loading server configuration from disk

use std::io::Write;
use tempfile::{tempdir, NamedTempFile};
use xcap_appusage::appusage::Application;
use xcap_appusage::config::DEFAULT_ROOT;
use xcap_appusage::{ServerConfig, XcapError};

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_string_form() {
    let file = write_config(
        r#"
[server]
applications = "resource-lists, rls-services"
root = "https://xcap.example.org/root"
"#,
    );
    let config = ServerConfig::load(file.path()).unwrap();
    assert_eq!(
        config.applications.applications(),
        &[Application::ResourceLists, Application::RlsServices]
    );
    assert!(config.document_validation);
    assert_eq!(config.root, "https://xcap.example.org/root");
}

#[test]
fn test_load_array_form() {
    let file = write_config(
        r#"
[server]
applications = ["watchers", "xcap-caps", "unknown-app"]
document_validation = false
"#,
    );
    let config = ServerConfig::load(file.path()).unwrap();
    assert_eq!(
        config.applications.applications(),
        &[Application::Watchers, Application::XcapCaps]
    );
    assert!(!config.document_validation);
    assert_eq!(config.root, DEFAULT_ROOT);
}

#[test]
fn test_load_all_and_other_tables() {
    let file = write_config(
        r#"
[logging]
level = "debug"

[server]
applications = "all"
"#,
    );
    let config = ServerConfig::load(file.path()).unwrap();
    assert_eq!(
        config.applications.applications(),
        &Application::PRODUCTION[..]
    );
}

#[test]
fn test_load_missing_file() {
    let dir = tempdir().unwrap();
    let result = ServerConfig::load(dir.path().join("absent.toml"));
    match result {
        Err(e @ XcapError::Io(_)) => assert_eq!(e.status_code(), 500),
        other => panic!("expected an I/O error, got {:?}", other),
    }
}

#[test]
fn test_load_malformed_file() {
    let file = write_config("[server]\napplications = 42\n");
    assert!(matches!(
        ServerConfig::load(file.path()),
        Err(XcapError::Config(_))
    ));
}
