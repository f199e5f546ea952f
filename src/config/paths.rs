//! Persisted name -> value maps maintained through the HTTP API.
//!
//! `log_paths.json` maps `"<agent>|<service>"` to an absolute log file path and
//! `webapps.json` maps a service name to the URL polled by the health monitor.
//! Both are inputs to the engine only: a missing or unreadable file reads as
//! an empty map.

use super::ConfigError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

const MAPPED_IPV4_PREFIX: &str = "::ffff:";

/// One `(agent, service) -> path` entry from `log_paths.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LogPathEntry {
    pub agent: String,
    pub service: String,
    pub path: PathBuf,
}

pub struct PathStore {
    log_paths_file: PathBuf,
    webapps_file: PathBuf,
    /// Serializes read-modify-write cycles on both files.
    write_lock: Mutex<()>,
}

impl PathStore {
    pub fn new(log_paths_file: PathBuf, webapps_file: PathBuf) -> Self {
        Self {
            log_paths_file,
            webapps_file,
            write_lock: Mutex::new(()),
        }
    }

    /// Every log-path entry, with keys normalized. Keys without `|` are
    /// attributed to `local_agent`.
    pub fn log_path_entries(&self, local_agent: &str) -> Vec<LogPathEntry> {
        read_map(&self.log_paths_file)
            .into_iter()
            .filter_map(|(key, path)| {
                let (agent, service) = split_key(&key, local_agent)?;
                if path.trim().is_empty() {
                    return None;
                }
                Some(LogPathEntry {
                    agent,
                    service,
                    path: PathBuf::from(path),
                })
            })
            .collect()
    }

    /// Log-path entries belonging to `agent`.
    pub fn entries_for_agent(&self, agent: &str) -> Vec<LogPathEntry> {
        self.log_path_entries(agent)
            .into_iter()
            .filter(|e| e.agent == agent)
            .collect()
    }

    pub fn log_path(&self, agent: &str, service: &str) -> Option<PathBuf> {
        self.log_path_entries(agent)
            .into_iter()
            .find(|e| e.agent == agent && e.service == service)
            .map(|e| e.path)
    }

    pub fn set_log_path(&self, agent: &str, service: &str, path: &Path) -> Result<(), ConfigError> {
        let _guard = self.lock();
        let mut map = read_map(&self.log_paths_file);
        map.insert(
            format!("{}|{}", agent, service),
            path.to_string_lossy().into_owned(),
        );
        write_map(&self.log_paths_file, &map)
    }

    pub fn webapps(&self) -> BTreeMap<String, String> {
        read_map(&self.webapps_file)
    }

    pub fn set_webapp(&self, service: &str, url: &str) -> Result<(), ConfigError> {
        let _guard = self.lock();
        let mut map = read_map(&self.webapps_file);
        map.insert(service.to_string(), url.to_string());
        write_map(&self.webapps_file, &map)
    }

    /// Returns whether an entry was removed.
    pub fn remove_webapp(&self, service: &str) -> Result<bool, ConfigError> {
        let _guard = self.lock();
        let mut map = read_map(&self.webapps_file);
        if map.remove(service).is_none() {
            return Ok(false);
        }
        write_map(&self.webapps_file, &map)?;
        Ok(true)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded data is `()`, a poisoned lock carries no broken state.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Splits a stored key into `(agent, service)`.
fn split_key(key: &str, local_agent: &str) -> Option<(String, String)> {
    let (agent, service) = match key.split_once('|') {
        Some((agent, service)) => (agent.trim(), service.trim()),
        None => (local_agent, key.trim()),
    };
    let agent = agent.strip_prefix(MAPPED_IPV4_PREFIX).unwrap_or(agent);

    if service.is_empty() {
        return None;
    }
    let agent = if agent.is_empty() { local_agent } else { agent };
    Some((agent.to_string(), service.to_string()))
}

fn read_map(path: &Path) -> BTreeMap<String, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "state file not found, treating as empty");
            return BTreeMap::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read state file, treating as empty");
            return BTreeMap::new();
        }
    };

    if raw.trim().is_empty() {
        return BTreeMap::new();
    }

    match serde_json::from_str(&raw) {
        Ok(map) => map,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse state file, treating as empty");
            BTreeMap::new()
        }
    }
}

/// Writes through a temporary sibling and renames it into place.
fn write_map(path: &Path, map: &BTreeMap<String, String>) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(map)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> PathStore {
        PathStore::new(
            dir.path().join("log_paths.json"),
            dir.path().join("webapps.json"),
        )
    }

    #[test]
    fn test_missing_files_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.log_path_entries("host").is_empty());
        assert!(store.webapps().is_empty());
        assert_eq!(store.log_path("host", "svc"), None);
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("log_paths.json"), "{not json").unwrap();
        assert!(store(&dir).log_path_entries("host").is_empty());
    }

    #[test]
    fn test_key_normalization() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("log_paths.json"),
            r#"{
                "::ffff:10.0.0.5|appserver": "/logs/app.log",
                "host|broker": "/logs/broker.log",
                "bare": "/logs/bare.log",
                "host|": "/logs/ignored.log"
            }"#,
        )
        .unwrap();

        let mut entries = store(&dir).log_path_entries("host");
        entries.sort_by(|a, b| a.service.cmp(&b.service));

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].service, "appserver");
        assert_eq!(entries[0].agent, "10.0.0.5");
        assert_eq!(entries[1].service, "bare");
        assert_eq!(entries[1].agent, "host");
        assert_eq!(entries[2].service, "broker");
        assert_eq!(entries[2].path, PathBuf::from("/logs/broker.log"));
    }

    #[test]
    fn test_set_and_get_log_path() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .set_log_path("host", "svc", Path::new("/logs/svc.log"))
            .unwrap();
        store
            .set_log_path("other", "svc", Path::new("/logs/other.log"))
            .unwrap();

        assert_eq!(
            store.log_path("host", "svc"),
            Some(PathBuf::from("/logs/svc.log"))
        );
        assert_eq!(store.entries_for_agent("host").len(), 1);
        assert_eq!(store.log_path_entries("host").len(), 2);
    }

    #[test]
    fn test_webapp_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.set_webapp("portal", "http://localhost:8080").unwrap();
        assert_eq!(
            store.webapps().get("portal").map(String::as_str),
            Some("http://localhost:8080")
        );
        assert!(store.remove_webapp("portal").unwrap());
        assert!(!store.remove_webapp("portal").unwrap());
        assert!(store.webapps().is_empty());
    }
}
