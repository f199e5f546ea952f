use crate::extract::ExtractedBlock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Identity of one watched file: at most one watcher exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WatchKey {
    pub agent: String,
    pub service: String,
    pub path: PathBuf,
}

impl WatchKey {
    pub fn new(agent: impl Into<String>, service: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            agent: agent.into(),
            service: service.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.agent, self.service, self.path.display())
    }
}

/// A persisted error occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Empty until computed; see [`ErrorEvent::ensure_hash`].
    pub content_hash: String,
    /// Capture time, not log time.
    pub detected_at: DateTime<Utc>,
    pub agent: String,
    pub service: String,
    pub user: String,
    pub source_ref: String,
    pub routine: String,
    pub routine_description: String,
    pub message: String,
    pub log_timestamp: String,
    pub line_number: Option<u32>,
    pub raw_block: String,
}

impl ErrorEvent {
    pub fn from_block(agent: &str, service: &str, block: ExtractedBlock) -> Self {
        let mut event = Self {
            content_hash: String::new(),
            detected_at: Utc::now(),
            agent: agent.to_string(),
            service: service.to_string(),
            user: block.user,
            source_ref: block.source_ref,
            routine: block.routine,
            routine_description: block.routine_description,
            message: block.message,
            log_timestamp: block.log_timestamp,
            line_number: block.line_number,
            raw_block: block.raw_block,
        };
        event.ensure_hash();
        event
    }

    pub fn compute_hash(&self) -> String {
        content_hash(
            &self.agent,
            &self.service,
            &self.user,
            &self.routine,
            &self.message,
            &self.log_timestamp,
        )
    }

    /// Fills in the content hash if it is missing and returns it.
    pub fn ensure_hash(&mut self) -> &str {
        if self.content_hash.is_empty() {
            self.content_hash = self.compute_hash();
        }
        &self.content_hash
    }
}

/// SHA-256, lower-case hex, over the canonical JSON object
/// `{"agent","service","user","routine","message","log_timestamp"}` in that
/// key order.
pub fn content_hash(
    agent: &str,
    service: &str,
    user: &str,
    routine: &str,
    message: &str,
    log_timestamp: &str,
) -> String {
    let canonical = format!(
        r#"{{"agent":{},"service":{},"user":{},"routine":{},"message":{},"log_timestamp":{}}}"#,
        json_string(agent),
        json_string(service),
        json_string(user),
        json_string(routine),
        json_string(message),
        json_string(log_timestamp),
    );

    let digest = Sha256::digest(canonical.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn json_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_blocks;

    #[test]
    fn test_hash_shape_and_stability() {
        let a = content_hash("host", "svc", "jdoe", "BAR", "boom", "01/01/2024 10:00:00");
        let b = content_hash("host", "svc", "jdoe", "BAR", "boom", "01/01/2024 10:00:00");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_covers_every_semantic_field() {
        let base = content_hash("a", "s", "u", "r", "m", "t");
        assert_ne!(base, content_hash("x", "s", "u", "r", "m", "t"));
        assert_ne!(base, content_hash("a", "x", "u", "r", "m", "t"));
        assert_ne!(base, content_hash("a", "s", "x", "r", "m", "t"));
        assert_ne!(base, content_hash("a", "s", "u", "x", "m", "t"));
        assert_ne!(base, content_hash("a", "s", "u", "r", "x", "t"));
        assert_ne!(base, content_hash("a", "s", "u", "r", "m", "x"));
    }

    #[test]
    fn test_hash_fields_do_not_run_together() {
        assert_ne!(
            content_hash("ab", "c", "", "", "", ""),
            content_hash("a", "bc", "", "", "", "")
        );
        // Quotes are escaped, so they cannot forge a field boundary.
        assert_ne!(
            content_hash("a\",\"service\":\"b", "", "", "", "", ""),
            content_hash("a", "b", "", "", "", "")
        );
    }

    #[test]
    fn test_detection_time_not_hashed() {
        let text = "THREAD ERROR 01/01/2024 10:00:00\nCall on FOO(BAR.PRW)\n";
        let block = extract_blocks(text).remove(0);
        let first = ErrorEvent::from_block("host", "svc", block.clone());
        let mut second = ErrorEvent::from_block("host", "svc", block);
        second.detected_at = first.detected_at + chrono::Duration::hours(1);
        second.content_hash.clear();
        assert_eq!(second.ensure_hash(), first.content_hash);
    }

    #[test]
    fn test_watch_key_display() {
        let key = WatchKey::new("host", "svc", "/logs/app.log");
        assert_eq!(key.to_string(), "host|svc|/logs/app.log");
    }
}
