use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    pub web: WebConfig,
    pub storage: StorageConfig,
    pub state: StateConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

impl Config {
    /// Agent identifier used in watch keys and persisted events.
    ///
    /// Falls back to the host name, then to `local`.
    pub fn agent_id(&self) -> String {
        if let Some(id) = self.agent.id.as_ref().filter(|id| !id.is_empty()) {
            return id.clone();
        }

        hostname::get()
            .ok()
            .and_then(|h| h.to_str().map(|s| s.to_string()))
            .unwrap_or_else(|| "local".to_string())
    }

    pub fn log_paths_file(&self) -> PathBuf {
        self.state.dir.join("log_paths.json")
    }

    pub fn webapps_file(&self) -> PathBuf {
        self.state.dir.join("webapps.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub listen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(with = "humantime_serde", default = "default_reconcile_interval")]
    pub reconcile_interval: Duration,
    #[serde(default = "default_lookback_bytes")]
    pub lookback_bytes: usize,
    #[serde(with = "humantime_serde", default = "default_settle_delay")]
    pub settle_delay: Duration,
    #[serde(default)]
    pub watch: WatchMode,
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: default_reconcile_interval(),
            lookback_bytes: default_lookback_bytes(),
            settle_delay: default_settle_delay(),
            watch: WatchMode::default(),
            poll_interval: default_poll_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_lookback_bytes() -> usize {
    65536
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_channel_capacity() -> usize {
    16
}

/// How change notifications are produced for a watched file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// OS notifications (inotify, FSEvents, ReadDirectoryChangesW).
    #[default]
    Native,
    /// Periodic stat polling, for network shares that drop native events.
    Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_backlog_lines")]
    pub backlog_lines: usize,
    #[serde(default = "default_max_backlog_lines")]
    pub max_backlog_lines: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backlog_lines: default_backlog_lines(),
            max_backlog_lines: default_max_backlog_lines(),
        }
    }
}

fn default_backlog_lines() -> usize {
    250
}

fn default_max_backlog_lines() -> usize {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(with = "humantime_serde", default = "default_health_interval")]
    pub interval: Duration,
    #[serde(with = "humantime_serde", default = "default_health_timeout")]
    pub timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            timeout: default_health_timeout(),
        }
    }
}

fn default_health_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Command templates for the OS service collaborator. `{name}` is replaced
/// with the service name; each template is an argv array, never a shell line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_start_command")]
    pub start: Vec<String>,
    #[serde(default = "default_stop_command")]
    pub stop: Vec<String>,
    /// Empty means stop followed by start.
    #[serde(default)]
    pub restart: Vec<String>,
    #[serde(default = "default_status_command")]
    pub status: Vec<String>,
    /// Lists installed services, one per line. Empty disables discovery.
    #[serde(default = "default_list_command")]
    pub list: Vec<String>,
    /// Default case-insensitive name filter for `GET /api/services`.
    #[serde(default = "default_list_filter")]
    pub list_filter: String,
    #[serde(with = "humantime_serde", default = "default_service_timeout")]
    pub timeout: Duration,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            start: default_start_command(),
            stop: default_stop_command(),
            restart: Vec::new(),
            status: default_status_command(),
            list: default_list_command(),
            list_filter: default_list_filter(),
            timeout: default_service_timeout(),
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(windows)]
fn default_start_command() -> Vec<String> {
    argv(&["sc", "start", "{name}"])
}

#[cfg(not(windows))]
fn default_start_command() -> Vec<String> {
    argv(&["systemctl", "start", "{name}"])
}

#[cfg(windows)]
fn default_stop_command() -> Vec<String> {
    argv(&["net", "stop", "{name}"])
}

#[cfg(not(windows))]
fn default_stop_command() -> Vec<String> {
    argv(&["systemctl", "stop", "{name}"])
}

#[cfg(windows)]
fn default_status_command() -> Vec<String> {
    argv(&["sc", "query", "{name}"])
}

#[cfg(not(windows))]
fn default_status_command() -> Vec<String> {
    argv(&["systemctl", "is-active", "{name}"])
}

#[cfg(windows)]
fn default_list_command() -> Vec<String> {
    argv(&["sc", "query", "type=", "service", "state=", "all"])
}

#[cfg(not(windows))]
fn default_list_command() -> Vec<String> {
    argv(&[
        "systemctl",
        "list-units",
        "--type=service",
        "--all",
        "--plain",
        "--no-legend",
    ])
}

fn default_list_filter() -> String {
    "TOTVS".to_string()
}

fn default_service_timeout() -> Duration {
    Duration::from_secs(30)
}
