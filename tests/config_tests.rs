use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use vigil::config::{generate::generate_starter_config, load_config, ConfigError, PathStore, WatchMode};

#[test]
fn test_generated_config_loads_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(&config_path, generate_starter_config()).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.web.listen, "0.0.0.0:3000");
    assert_eq!(config.monitor.reconcile_interval, Duration::from_secs(60));
    assert_eq!(config.stream.backlog_lines, 250);
    assert!(config.log_paths_file().ends_with("log_paths.json"));
    assert!(config.webapps_file().ends_with("webapps.json"));
    assert!(!config.storage.path.to_string_lossy().starts_with('~'));
}

#[test]
fn test_full_config_with_all_sections() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    let yaml = format!(
        r#"
agent:
  id: protheus-01
  api_key: topsecret
web:
  listen: 127.0.0.1:4000
storage:
  path: {dir}/events.duckdb
state:
  dir: {dir}/state
monitor:
  reconcile_interval: 30s
  lookback_bytes: 4096
  settle_delay: 1500ms
  watch: poll
  poll_interval: 250ms
  channel_capacity: 8
stream:
  backlog_lines: 100
  max_backlog_lines: 2000
health:
  interval: 2m
  timeout: 3s
services:
  start: ["svc", "up", "{{name}}"]
  stop: ["svc", "down", "{{name}}"]
  restart: ["svc", "bounce", "{{name}}"]
  status: ["svc", "state", "{{name}}"]
  timeout: 10s
"#,
        dir = temp_dir.path().display()
    );
    fs::write(&config_path, yaml).unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.agent_id(), "protheus-01");
    assert_eq!(config.monitor.watch, WatchMode::Poll);
    assert_eq!(config.monitor.settle_delay, Duration::from_millis(1500));
    assert_eq!(config.monitor.lookback_bytes, 4096);
    assert_eq!(config.health.interval, Duration::from_secs(120));
    assert_eq!(config.services.restart, vec!["svc", "bounce", "{name}"]);
    assert_eq!(config.log_paths_file(), temp_dir.path().join("state/log_paths.json"));
}

#[test]
fn test_invalid_config_reports_every_problem() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(
        &config_path,
        r#"
agent:
  api_key: ""
web:
  listen: not-an-address
storage:
  path: /tmp/vigil.duckdb
state:
  dir: /tmp/vigil
monitor:
  lookback_bytes: 16
stream:
  backlog_lines: 900
  max_backlog_lines: 10
"#,
    )
    .unwrap();

    match load_config(&config_path) {
        Err(ConfigError::ValidationList(errors)) => {
            assert!(errors.iter().any(|e| e.contains("api_key")));
            assert!(errors.iter().any(|e| e.contains("web.listen")));
            assert!(errors.iter().any(|e| e.contains("lookback_bytes")));
            assert!(errors.iter().any(|e| e.contains("backlog_lines")));
        }
        other => panic!("expected validation list, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_env_reference_expanded_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    std::env::set_var("VIGIL_IT_API_KEY", "from-env");
    fs::write(
        &config_path,
        r#"
agent:
  api_key: $env{VIGIL_IT_API_KEY}
web:
  listen: 127.0.0.1:3000
storage:
  path: /tmp/vigil.duckdb
state:
  dir: /tmp/vigil
"#,
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.agent.api_key, "from-env");
}

#[test]
fn test_path_store_tolerates_corrupt_state() {
    let temp_dir = TempDir::new().unwrap();
    let log_paths = temp_dir.path().join("log_paths.json");
    fs::write(&log_paths, "{ not json").unwrap();

    let store = PathStore::new(log_paths, temp_dir.path().join("webapps.json"));
    assert!(store.log_path_entries("host").is_empty());
    assert!(store.webapps().is_empty());

    // Writing replaces the corrupt map.
    let log = temp_dir.path().join("app.log");
    store.set_log_path("host", "appserver", &log).unwrap();
    assert_eq!(store.log_path("host", "appserver"), Some(log));
}
