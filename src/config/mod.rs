pub mod generate;
pub mod parse;
pub mod paths;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub use parse::{load_config, ConfigError};
pub use paths::{LogPathEntry, PathStore};
pub use types::{Config, MonitorConfig, StreamConfig, WatchMode};

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// Expands `$env{VAR_NAME}` references. Unset variables are left unchanged
/// so that validation can report them.
pub fn expand_env_vars(text: &str) -> String {
    env_var_pattern()
        .replace_all(text, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
}

/// Names of `$env{...}` references still present in `text`, sorted and deduplicated.
pub(crate) fn unexpanded_env_vars(text: &str) -> Vec<String> {
    let mut vars: Vec<String> = env_var_pattern()
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect();
    vars.sort();
    vars.dedup();
    vars
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Default location for a freshly generated user config.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/vigil/config.yml"))
}

pub const SYSTEM_CONFIG_PATH: &str = "/etc/vigil/config.yml";

/// Resolves the config file path. Returns the first hit from:
/// 1. the explicit path (tilde-expanded)
/// 2. ~/.config/vigil/config.yml
/// 3. /etc/vigil/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}
