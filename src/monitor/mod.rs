//! The error-extraction engine: per-file cursors, deduplicated persistence
//! and the watcher registry that drives them.

pub mod cursor;
pub mod dedup;
pub mod event;
pub mod registry;

pub use cursor::{CursorStep, TailCursor};
pub use dedup::DedupStore;
pub use event::{content_hash, ErrorEvent, WatchKey};
pub use registry::{Activation, ReconcileReport, RegistryOptions, WatcherRegistry, WatcherStatus};

use crate::source::{TailError, WatchError};
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("tail error: {0}")]
    Tail(#[from] TailError),

    #[error("watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
