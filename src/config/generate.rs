pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# VIGIL CONFIGURATION
# =============================================================================
# Vigil watches application log files on this host, extracts THREAD ERROR
# blocks into a deduplicated event store, streams live log content to viewers
# and exposes a small HTTP control API.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/vigil/config.yml
#   3. /etc/vigil/config.yml
#
# Any value may reference an environment variable as $env{NAME}.

# =============================================================================
# AGENT
# =============================================================================
agent:
  # Identifier recorded on every event and used in watch keys.
  # Defaults to the host name when omitted.
  # id: app-server-01

  # Shared secret required on every API call (header x-api-key or ?key=).
  api_key: change-me

# =============================================================================
# WEB SERVER
# =============================================================================
web:
  listen: 0.0.0.0:3000

# =============================================================================
# STORAGE
# =============================================================================
# DuckDB database holding persisted error events.
storage:
  path: ~/.local/share/vigil/vigil.duckdb

# =============================================================================
# STATE
# =============================================================================
# Directory holding log_paths.json (service -> log file) and webapps.json
# (service -> health URL). Both are maintained through the HTTP API.
state:
  dir: ~/.local/share/vigil

# =============================================================================
# MONITOR
# =============================================================================
monitor:
  # How often the watcher set is re-derived from log_paths.json
  reconcile_interval: 60s
  # Text kept for one block; past this only remark lines are kept
  lookback_bytes: 65536
  # An open block with no growth for this long is emitted
  settle_delay: 2s
  # native: OS file notifications; poll: periodic stat (network shares)
  watch: native
  poll_interval: 500ms
  channel_capacity: 16

# =============================================================================
# LIVE STREAM
# =============================================================================
stream:
  backlog_lines: 250
  max_backlog_lines: 5000

# =============================================================================
# WEBAPP HEALTH
# =============================================================================
health:
  interval: 60s
  timeout: 5s

# =============================================================================
# SERVICE CONTROL
# =============================================================================
# argv templates; {name} is replaced with the service name. Omit to use the
# platform defaults (systemctl, or sc/net on Windows). An empty restart runs
# stop then start.
#
# services:
#   start: [systemctl, start, "{name}"]
#   stop: [systemctl, stop, "{name}"]
#   restart: [systemctl, restart, "{name}"]
#   status: [systemctl, is-active, "{name}"]
#   # Service discovery for the dashboard; GET /api/services?filter= overrides
#   list: [systemctl, list-units, --type=service, --all, --plain, --no-legend]
#   list_filter: TOTVS
#   timeout: 30s
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse::parse_config;

    #[test]
    fn test_starter_config_is_valid() {
        let config = parse_config(&generate_starter_config()).unwrap();
        assert_eq!(config.agent.api_key, "change-me");
        assert_eq!(config.web.listen, "0.0.0.0:3000");
        assert!(config.state.dir.ends_with(".local/share/vigil"));
    }
}
