//! Change notifications for a single file, delivered over a bounded channel.
//!
//! Events only say "look again"; the consumer reads whatever the file holds
//! when it gets around to it. A full channel therefore drops the event, since
//! the pending one already covers it.

use crate::config::WatchMode;
use notify::{EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The file may have new content (written, created or renamed into place).
    Changed,
    /// The file was removed from disk.
    Removed,
    /// The notification backend failed; the watch is no longer reliable.
    Error(String),
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub mode: WatchMode,
    pub poll_interval: Duration,
    pub capacity: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            mode: WatchMode::Native,
            poll_interval: Duration::from_millis(500),
            capacity: 16,
        }
    }
}

impl From<&crate::config::MonitorConfig> for WatchOptions {
    fn from(config: &crate::config::MonitorConfig) -> Self {
        Self {
            mode: config.watch,
            poll_interval: config.poll_interval,
            capacity: config.channel_capacity,
        }
    }
}

enum Backend {
    Native(RecommendedWatcher),
    Poll(PollWatcher),
}

/// A live subscription. Dropping it stops the underlying watch.
pub struct FileWatch {
    rx: mpsc::Receiver<WatchEvent>,
    tx: mpsc::Sender<WatchEvent>,
    _backend: Backend,
}

impl FileWatch {
    pub fn subscribe(path: &Path, options: WatchOptions) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel(options.capacity.max(1));
        let targets = target_paths(path);

        let handler_tx = tx.clone();
        let handler = move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if !event.paths.iter().any(|p| targets.contains(p)) {
                    return;
                }
                let watch_event = match event.kind {
                    EventKind::Remove(_) => WatchEvent::Removed,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any => {
                        WatchEvent::Changed
                    }
                    _ => return,
                };
                let _ = handler_tx.try_send(watch_event);
            }
            Err(e) => {
                let _ = handler_tx.try_send(WatchEvent::Error(e.to_string()));
            }
        };

        let map_err = |source| WatchError::Notify {
            path: path.to_path_buf(),
            source,
        };

        let backend = match options.mode {
            WatchMode::Native => {
                let mut watcher = notify::recommended_watcher(handler).map_err(map_err)?;
                // Not every backend can watch a single file, so watch the
                // directory and filter by path.
                let dir = match path.parent() {
                    Some(dir) if !dir.as_os_str().is_empty() => dir,
                    _ => Path::new("."),
                };
                watcher
                    .watch(dir, RecursiveMode::NonRecursive)
                    .map_err(map_err)?;
                Backend::Native(watcher)
            }
            WatchMode::Poll => {
                let config = notify::Config::default().with_poll_interval(options.poll_interval);
                let mut watcher = PollWatcher::new(handler, config).map_err(map_err)?;
                watcher
                    .watch(path, RecursiveMode::NonRecursive)
                    .map_err(map_err)?;
                Backend::Poll(watcher)
            }
        };

        Ok(Self {
            rx,
            tx,
            _backend: backend,
        })
    }

    /// Waits for the next event. Returns `None` only if the channel closed.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    /// Enqueues a synthetic change so the consumer re-reads the file.
    pub fn poke(&self) {
        let _ = self.tx.try_send(WatchEvent::Changed);
    }
}

/// The path as given plus its canonical form, since backends may report either.
fn target_paths(path: &Path) -> Vec<PathBuf> {
    let mut targets = vec![path.to_path_buf()];
    if let Ok(canonical) = std::fs::canonicalize(path) {
        if canonical != path {
            targets.push(canonical);
        }
    }
    targets
}
