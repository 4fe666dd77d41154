use crate::config::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.dispatcher.attempt_deadline_seconds, 180);
    assert_eq!(config.agent.ping_command, vec!["ping", "-c", "1"]);
    assert!(!config.agent.enabled);
    assert!(config.api.enabled);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[store]
backend = "sqlite"
url = "sqlite://data/test.db"

[dispatcher]
resolver = "static"
regions = ["us-central1", "europe-west1"]

[dispatcher.service_urls]
us-central1 = "https://measurer-us.example.com"

[platform]
project_id = "netlab"
scheduler = "cloud"
token_source = "metadata"

[agent]
enabled = true
region = "europe-west1"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();
    assert_eq!(config.store.backend, StoreBackend::Sqlite);
    assert_eq!(config.platform.scheduler, SchedulerBackend::Cloud);
    assert_eq!(config.platform.token_source, TokenSource::Metadata);
    assert_eq!(
        config.platform.service_account(),
        "deployer@netlab.iam.gserviceaccount.com"
    );
    assert_eq!(config.agent.region, "europe-west1");
    assert!(config.dispatcher.is_known_region("us-central1"));
    assert!(!config.dispatcher.is_known_region("asia-east1"));
    assert_eq!(
        config.dispatcher.service_urls.get("us-central1").map(String::as_str),
        Some("https://measurer-us.example.com")
    );
}

#[test]
fn test_config_validation_rejects_bad_values() {
    let mut config = AppConfig::default();
    config.store.backend = StoreBackend::Sqlite;
    config.store.url = "postgres://localhost/db".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.platform.token_source = TokenSource::Static;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.agent.ping_command.clear();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.log_level = "verbose".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.dispatcher.service_url_template = None;
    assert!(config.validate().is_err());
}

#[test]
fn test_deadlines_must_cover_probe_timeout() {
    let config = AppConfig::default();
    assert!(config.dispatcher.invocation_timeout_seconds >= config.agent.probe_timeout_seconds);
    assert!(config.agent.request_timeout_seconds >= config.agent.probe_timeout_seconds);

    let mut config = AppConfig::default();
    config.dispatcher.invocation_timeout_seconds = 30;
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("invocation_timeout_seconds"));

    let mut config = AppConfig::default();
    config.dispatcher.attempt_deadline_seconds = 60;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.agent.request_timeout_seconds = 60;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.agent.probe_timeout_seconds = 30;
    config.agent.request_timeout_seconds = 30;
    config.dispatcher.invocation_timeout_seconds = 30;
    config.dispatcher.attempt_deadline_seconds = 30;
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_roundtrip_toml() {
    let config = AppConfig::default();
    let toml_str = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed.agent.region, config.agent.region);
    assert_eq!(parsed.api.bind_address, config.api.bind_address);
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[api]
bind_address = "127.0.0.1:9090"

[agent]
region = "asia-east1"
probe_timeout_seconds = 15
"#
    )
    .unwrap();

    let config = AppConfig::load(file.path().to_str()).unwrap();
    assert_eq!(config.api.bind_address, "127.0.0.1:9090");
    assert_eq!(config.agent.region, "asia-east1");
    assert_eq!(config.agent.probe_timeout_seconds, 15);
}

#[test]
fn test_load_missing_file_fails() {
    assert!(AppConfig::load(Some("/nonexistent/measurement.toml")).is_err());
}
