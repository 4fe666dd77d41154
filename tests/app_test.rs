use std::io::Write;
use std::time::Duration;

use measurement::app::{AppMode, Application};
use measurement::shutdown::ShutdownManager;
use measurement_core::config::{AppConfig, SchedulerBackend, StoreBackend};
use serde_json::{json, Value};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn test_sample_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/measurement.toml");
    let config = AppConfig::load(Some(path)).unwrap();

    assert_eq!(config.store.backend, StoreBackend::Sqlite);
    assert_eq!(config.platform.scheduler, SchedulerBackend::Local);
    assert_eq!(config.dispatcher.regions.len(), 3);
    assert!(config.agent.enabled);
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[store]\nbackend = \"sqlite\"\nurl = \"postgres://db\"").unwrap();

    assert!(AppConfig::load(file.path().to_str()).is_err());
    assert!(AppConfig::load(Some("/nonexistent/measurement.toml")).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_one_off_task_end_to_end() {
    let api_port = free_port();
    let agent_port = free_port();

    let mut config = AppConfig::default();
    config.api.bind_address = format!("127.0.0.1:{api_port}");
    config.agent.enabled = true;
    config.agent.region = "local".to_string();
    config.agent.bind_address = format!("127.0.0.1:{agent_port}");
    config.agent.ping_command = vec!["echo".to_string()];
    config.dispatcher.service_url_template = Some(format!("http://127.0.0.1:{agent_port}"));

    let app = Application::new(config, AppMode::All).await.unwrap();
    let shutdown = ShutdownManager::new();
    let handle = tokio::spawn(app.run(shutdown.subscribe()));

    let client = reqwest::Client::new();
    let api = format!("http://127.0.0.1:{api_port}");

    let mut created = None;
    for _ in 0..50 {
        match client
            .post(format!("{api}/api/v1/tasks"))
            .json(&json!({"vantagePoints": ["local"], "probe": "ping", "arguments": "8.8.8.8"}))
            .send()
            .await
        {
            Ok(response) => {
                created = Some(response);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    let response = created.expect("API服务器未启动");
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let mut status = String::new();
    for _ in 0..50 {
        let body: Value = client
            .get(format!("{api}/api/v1/tasks/{id}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        status = body["data"]["status"].as_str().unwrap_or_default().to_string();
        if status == "finished" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(status, "finished");

    let results: Value = client
        .get(format!("{api}/api/v1/tasks/{id}/results"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["data"]["numberOfSequence"]["local"], 1);
    assert_eq!(results["data"]["results"]["local"]["1"]["result"], "8.8.8.8");

    shutdown.shutdown();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
