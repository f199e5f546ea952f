use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Smallest accepted look-back window. Anything below cannot hold a header
/// plus its first body lines.
pub const MIN_LOOKBACK_BYTES: usize = 512;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("failed to parse JSON state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(inner) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), inner),
        )),
        other => other,
    })
}

/// Parses and validates a config document. Environment references are
/// expanded first and `~` is expanded in every path afterwards.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let unexpanded = unexpanded_env_vars(yaml_string);
    if unexpanded.is_empty() {
        return Ok(());
    }

    let error_msg = if unexpanded.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with a literal value",
            unexpanded[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             Set them or replace the references with literal values",
            unexpanded.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    config.storage.path = expand_tilde(&config.storage.path);
    config.state.dir = expand_tilde(&config.state.dir);
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.agent.api_key.trim().is_empty() {
        errors.push("agent.api_key cannot be empty".to_string());
    }

    if let Some(id) = &config.agent.id {
        if id.contains('|') {
            errors.push(format!("agent.id '{}' cannot contain '|'", id));
        }
    }

    if config.web.listen.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "web.listen '{}' is not a valid socket address (expected host:port)",
            config.web.listen
        ));
    }

    if config.storage.path.as_os_str().is_empty() {
        errors.push("storage.path cannot be empty".to_string());
    }

    if config.state.dir.as_os_str().is_empty() {
        errors.push("state.dir cannot be empty".to_string());
    }

    validate_monitor(&config.monitor, &mut errors);
    validate_stream(&config.stream, &mut errors);
    validate_services(&config.services, &mut errors);

    if config.health.timeout.is_zero() {
        errors.push("health.timeout must be greater than zero".to_string());
    }
    if config.health.interval.is_zero() {
        errors.push("health.interval must be greater than zero".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_monitor(monitor: &MonitorConfig, errors: &mut Vec<String>) {
    if monitor.lookback_bytes < MIN_LOOKBACK_BYTES {
        errors.push(format!(
            "monitor.lookback_bytes must be at least {} (got {})",
            MIN_LOOKBACK_BYTES, monitor.lookback_bytes
        ));
    }
    if monitor.reconcile_interval.is_zero() {
        errors.push("monitor.reconcile_interval must be greater than zero".to_string());
    }
    if monitor.poll_interval.is_zero() {
        errors.push("monitor.poll_interval must be greater than zero".to_string());
    }
    if monitor.channel_capacity == 0 {
        errors.push("monitor.channel_capacity must be greater than zero".to_string());
    }
}

fn validate_stream(stream: &StreamConfig, errors: &mut Vec<String>) {
    if stream.max_backlog_lines == 0 {
        errors.push("stream.max_backlog_lines must be greater than zero".to_string());
    }
    if stream.backlog_lines > stream.max_backlog_lines {
        errors.push(format!(
            "stream.backlog_lines ({}) exceeds stream.max_backlog_lines ({})",
            stream.backlog_lines, stream.max_backlog_lines
        ));
    }
}

fn validate_services(services: &ServicesConfig, errors: &mut Vec<String>) {
    for (name, template) in [
        ("start", &services.start),
        ("stop", &services.stop),
        ("status", &services.status),
    ] {
        if template.is_empty() {
            errors.push(format!("services.{} command cannot be empty", name));
        }
    }
    if services.timeout.is_zero() {
        errors.push("services.timeout must be greater than zero".to_string());
    }
}
