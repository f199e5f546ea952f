use crate::monitor::event::ErrorEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Durable store of error events. Must enforce content-hash uniqueness on
/// its own, independent of any caller-side cache.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Inserts `event` unless one with the same content hash exists.
    /// Returns whether a row was written.
    async fn insert_event(&self, event: &ErrorEvent) -> Result<bool, StorageError>;

    /// Every stored content hash.
    async fn load_hashes(&self) -> Result<Vec<String>, StorageError>;

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<ErrorEvent>, StorageError>;

    async fn count_events(&self) -> Result<u64, StorageError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub limit: usize,
    pub offset: usize,
    pub order: SortOrder,
    pub service: Option<String>,
    pub agent: Option<String>,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            limit: 200,
            offset: 0,
            order: SortOrder::Desc,
            service: None,
            agent: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage connection lock poisoned")]
    LockPoisoned,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
