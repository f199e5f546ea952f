//! OS service control: start, stop, restart and status through configured
//! command templates.

use crate::config::types::ServicesConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Status reported when the status command output is not recognized.
pub const UNKNOWN_STATUS: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl FromStr for ServiceAction {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            other => Err(ServiceError::InvalidAction(other.to_string())),
        }
    }
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("invalid service name: {0:?}")]
    InvalidName(String),

    #[error("no command configured for {0}")]
    EmptyCommand(&'static str),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("failed to list services: {0}")]
    ListFailed(String),

    #[error("failed to {action} service {name}: {detail}")]
    Failed {
        action: ServiceAction,
        name: String,
        detail: String,
    },
}

/// The OS collaborator that owns service lifecycle.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn apply(&self, name: &str, action: ServiceAction) -> Result<(), ServiceError>;

    /// Current state as the OS reports it, e.g. `RUNNING` or `active`.
    async fn status(&self, name: &str) -> Result<String, ServiceError>;

    /// Installed services, sorted and without duplicates.
    async fn list(&self) -> Result<Vec<String>, ServiceError>;
}

/// Runs argv templates from [`ServicesConfig`] with `{name}` substituted.
/// Nothing goes through a shell.
pub struct CommandServiceControl {
    config: ServicesConfig,
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl CommandServiceControl {
    pub fn new(config: ServicesConfig) -> Self {
        Self { config }
    }

    async fn run(&self, template: &[String], name: &str, which: &'static str) -> Result<CommandOutput, ServiceError> {
        let argv = render(template, name);
        let (program, args) = argv.split_first().ok_or(ServiceError::EmptyCommand(which))?;

        debug!(program = %program, ?args, "running service command");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.config.timeout, child)
            .await
            .map_err(|_| ServiceError::Timeout {
                program: program.clone(),
                timeout: self.config.timeout,
            })?
            .map_err(|source| ServiceError::Spawn {
                program: program.clone(),
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_checked(
        &self,
        template: &[String],
        name: &str,
        action: ServiceAction,
        which: &'static str,
    ) -> Result<(), ServiceError> {
        let output = self.run(template, name, which).await?;
        if output.success {
            return Ok(());
        }
        let detail = match output.stderr.trim() {
            "" => output.stdout.trim().to_string(),
            stderr => stderr.to_string(),
        };
        Err(ServiceError::Failed {
            action,
            name: name.to_string(),
            detail,
        })
    }
}

#[async_trait]
impl ServiceControl for CommandServiceControl {
    async fn apply(&self, name: &str, action: ServiceAction) -> Result<(), ServiceError> {
        validate_name(name)?;

        match action {
            ServiceAction::Start => self.run_checked(&self.config.start, name, action, "start").await?,
            ServiceAction::Stop => self.run_checked(&self.config.stop, name, action, "stop").await?,
            ServiceAction::Restart if !self.config.restart.is_empty() => {
                self.run_checked(&self.config.restart, name, action, "restart").await?
            }
            ServiceAction::Restart => {
                // A service that is already stopped makes stop fail; start
                // decides the outcome.
                if let Err(e) = self.run_checked(&self.config.stop, name, action, "stop").await {
                    warn!(service = %name, error = %e, "stop before restart failed");
                }
                self.run_checked(&self.config.start, name, action, "start").await?
            }
        }

        info!(service = %name, action = %action, "service command completed");
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<String, ServiceError> {
        validate_name(name)?;
        // Status commands exit non-zero for stopped services but still
        // print the state.
        let output = self.run(&self.config.status, name, "status").await?;
        Ok(parse_status(&output.stdout))
    }

    async fn list(&self) -> Result<Vec<String>, ServiceError> {
        if self.config.list.is_empty() {
            return Ok(Vec::new());
        }
        let output = self.run(&self.config.list, "", "list").await?;
        if !output.success {
            return Err(ServiceError::ListFailed(output.stderr.trim().to_string()));
        }
        Ok(parse_service_list(&output.stdout))
    }
}

fn render(template: &[String], name: &str) -> Vec<String> {
    template.iter().map(|arg| arg.replace("{name}", name)).collect()
}

/// Service names become argv elements; still reject anything that could be
/// read as an option or a path.
fn validate_name(name: &str) -> Result<(), ServiceError> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@' | ' '));
    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidName(name.to_string()))
    }
}

/// Extracts the state from `sc query` style output (`STATE : 4 RUNNING`),
/// falling back to the first non-empty line (`systemctl is-active`).
pub fn parse_status(stdout: &str) -> String {
    static STATE: OnceLock<regex::Regex> = OnceLock::new();
    let state = STATE.get_or_init(|| regex::Regex::new(r"STATE\s+:\s+\d+\s+(\w+)").unwrap());

    if let Some(caps) = state.captures(stdout) {
        return caps[1].to_string();
    }
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_STATUS.to_string())
}

/// Service names from `sc query` output (`SERVICE_NAME: x` lines) or from
/// one-unit-per-line listings such as `systemctl list-units --plain`, where
/// the first column is taken and a `.service` suffix dropped.
pub fn parse_service_list(stdout: &str) -> Vec<String> {
    static SERVICE_NAME: OnceLock<regex::Regex> = OnceLock::new();
    let service_name =
        SERVICE_NAME.get_or_init(|| regex::Regex::new(r"(?m)^\s*SERVICE_NAME:\s*(.+?)\s*$").unwrap());

    let mut names: Vec<String> = if service_name.is_match(stdout) {
        service_name
            .captures_iter(stdout)
            .map(|caps| caps[1].to_string())
            .collect()
    } else {
        stdout
            .lines()
            .filter_map(|line| {
                line.trim_start_matches(|c: char| matches!(c, '●' | '*' | ' '))
                    .split_whitespace()
                    .next()
            })
            .map(|unit| unit.strip_suffix(".service").unwrap_or(unit).to_string())
            .collect()
    };
    names.sort();
    names.dedup();
    names
}
