//! Watcher Registry: owns every active `(agent, service, path)` watcher.
//!
//! Each key gets one task that owns its [`TailCursor`] and [`FileWatch`] and
//! handles change events strictly in order. Reconciliation only adds
//! watchers; an active watcher stops only when its file or its watch fails,
//! and it then removes its own entry so the next pass can bring it back.

use super::cursor::{CursorStep, TailCursor};
use super::dedup::DedupStore;
use super::event::{ErrorEvent, WatchKey};
use super::MonitorError;
use crate::config::{LogPathEntry, MonitorConfig, PathStore};
use crate::extract::ExtractedBlock;
use crate::source::{FileWatch, WatchEvent, WatchOptions};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    pub lookback_bytes: usize,
    pub settle_delay: Duration,
    pub watch: WatchOptions,
}

impl From<&MonitorConfig> for RegistryOptions {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            lookback_bytes: config.lookback_bytes,
            settle_delay: config.settle_delay,
            watch: WatchOptions::from(config),
        }
    }
}

/// Outcome of a single activation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Activated,
    AlreadyActive,
    /// The file does not exist; retried on the next reconciliation.
    Missing,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub activated: Vec<WatchKey>,
    pub already_active: Vec<WatchKey>,
    pub missing: Vec<WatchKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatcherStatus {
    pub agent: String,
    pub service: String,
    pub path: String,
    pub offset: u64,
    pub started_at: DateTime<Utc>,
}

struct ActiveWatcher {
    id: Uuid,
    started_at: DateTime<Utc>,
    offset: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

struct RegistryInner {
    dedup: Arc<DedupStore>,
    options: RegistryOptions,
    active: Mutex<HashMap<WatchKey, ActiveWatcher>>,
    cancel: CancellationToken,
}

impl RegistryInner {
    fn active(&self) -> MutexGuard<'_, HashMap<WatchKey, ActiveWatcher>> {
        // Entries stay consistent under poisoning: every critical section is
        // a single insert, remove or read.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Removes `key` only if it still belongs to watcher `id`.
    fn remove_if_owner(&self, key: &WatchKey, id: Uuid) {
        let mut active = self.active();
        if active.get(key).is_some_and(|w| w.id == id) {
            active.remove(key);
        }
    }
}

/// Supervisor for all error-extraction watchers.
#[derive(Clone)]
pub struct WatcherRegistry {
    inner: Arc<RegistryInner>,
}

impl WatcherRegistry {
    pub fn new(dedup: Arc<DedupStore>, options: RegistryOptions) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                dedup,
                options,
                active: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Starts watching `key` unless it is already active or its file is
    /// missing.
    pub fn activate(&self, key: WatchKey) -> Activation {
        let mut active = self.inner.active();
        if active.contains_key(&key) {
            return Activation::AlreadyActive;
        }

        if !key.path.is_file() {
            warn!(
                agent = %key.agent,
                service = %key.service,
                path = %key.path.display(),
                "log file does not exist, not watching"
            );
            return Activation::Missing;
        }

        let id = Uuid::new_v4();
        let offset = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(run_watcher(
            self.inner.clone(),
            key.clone(),
            id,
            offset.clone(),
        ));

        active.insert(
            key,
            ActiveWatcher {
                id,
                started_at: Utc::now(),
                offset,
                handle,
            },
        );
        Activation::Activated
    }

    /// Activates every entry that is not active yet. Active watchers are
    /// never torn down here, even if their entry disappeared.
    pub fn reconcile(&self, entries: &[LogPathEntry]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for entry in entries {
            let key = WatchKey::new(&entry.agent, &entry.service, &entry.path);
            match self.activate(key.clone()) {
                Activation::Activated => report.activated.push(key),
                Activation::AlreadyActive => report.already_active.push(key),
                Activation::Missing => report.missing.push(key),
            }
        }
        report
    }

    /// Re-derives the watcher set from `paths` every `interval`, starting
    /// immediately, until [`shutdown`](Self::shutdown).
    pub fn spawn_reconciler(
        &self,
        paths: Arc<PathStore>,
        local_agent: String,
        interval: Duration,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        let cancel = self.inner.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let entries = paths.log_path_entries(&local_agent);
                let report = registry.reconcile(&entries);
                if !report.activated.is_empty() || !report.missing.is_empty() {
                    info!(
                        entries = entries.len(),
                        activated = report.activated.len(),
                        already_active = report.already_active.len(),
                        missing = report.missing.len(),
                        "reconciled log watchers"
                    );
                } else {
                    debug!(active = report.already_active.len(), "reconciled log watchers");
                }
            }
            debug!("reconciler stopped");
        })
    }

    pub fn is_active(&self, key: &WatchKey) -> bool {
        self.inner.active().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<WatcherStatus> {
        let mut statuses: Vec<WatcherStatus> = self
            .inner
            .active()
            .iter()
            .map(|(key, watcher)| WatcherStatus {
                agent: key.agent.clone(),
                service: key.service.clone(),
                path: key.path.display().to_string(),
                offset: watcher.offset.load(Ordering::Acquire),
                started_at: watcher.started_at,
            })
            .collect();
        statuses.sort_by(|a, b| (&a.agent, &a.service, &a.path).cmp(&(&b.agent, &b.service, &b.path)));
        statuses
    }

    /// Stops the reconciler and every watcher task.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        let drained: Vec<ActiveWatcher> = self.inner.active().drain().map(|(_, w)| w).collect();
        for watcher in drained {
            watcher.handle.abort();
        }
    }
}

async fn run_watcher(inner: Arc<RegistryInner>, key: WatchKey, id: Uuid, offset: Arc<AtomicU64>) {
    let options = inner.options;
    let mut cursor = TailCursor::new(&key.path, options.lookback_bytes);

    let mut watch = match start_watch(&inner, &key, &mut cursor).await {
        Ok(watch) => watch,
        Err(e) => {
            error!(service = %key.service, path = %key.path.display(), error = %e, "watcher failed to start");
            inner.remove_if_owner(&key, id);
            return;
        }
    };
    offset.store(cursor.offset(), Ordering::Release);
    watch.poke();

    loop {
        let deadline = cursor.settle_deadline(options.settle_delay);

        tokio::select! {
            _ = inner.cancel.cancelled() => break,

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(block) = cursor.flush() {
                    record_blocks(&inner.dedup, &key, vec![block]).await;
                }
            }

            event = watch.next() => {
                let reason = match event {
                    Some(WatchEvent::Changed) => None,
                    // Rotation may have put a new file in place already.
                    Some(WatchEvent::Removed) if key.path.exists() => None,
                    Some(WatchEvent::Removed) => Some("log file removed".to_string()),
                    Some(WatchEvent::Error(e)) => Some(format!("watch failed: {}", e)),
                    None => Some("watch channel closed".to_string()),
                };
                if let Some(reason) = reason {
                    error!(service = %key.service, path = %key.path.display(), reason = %reason, "watcher stopped");
                    break;
                }

                match cursor.advance().await {
                    Ok(step) => {
                        if step.truncated {
                            warn!(service = %key.service, offset = cursor.offset(), "log file truncated, resuming from new size");
                        } else if step.bytes_read > 0 {
                            debug!(service = %key.service, bytes = step.bytes_read, "read delta");
                        }
                        record_step(&inner.dedup, &key, step).await;
                    }
                    Err(e) if e.is_not_found() => {
                        error!(service = %key.service, path = %key.path.display(), "log file disappeared, watcher stopped");
                        break;
                    }
                    Err(e) => {
                        warn!(service = %key.service, error = %e, "delta read failed, skipping");
                    }
                }
                offset.store(cursor.offset(), Ordering::Release);
            }
        }
    }

    inner.remove_if_owner(&key, id);
}

/// Full scan from byte 0, then the subscription. The synthetic poke that
/// follows covers anything written in between.
async fn start_watch(
    inner: &RegistryInner,
    key: &WatchKey,
    cursor: &mut TailCursor,
) -> Result<FileWatch, MonitorError> {
    let step = cursor.advance().await?;
    let recorded = record_step(&inner.dedup, key, step).await;
    let watch = FileWatch::subscribe(&key.path, inner.options.watch)?;
    info!(
        service = %key.service,
        path = %key.path.display(),
        offset = cursor.offset(),
        recorded,
        "watcher started"
    );
    Ok(watch)
}

async fn record_step(dedup: &DedupStore, key: &WatchKey, step: CursorStep) -> usize {
    record_blocks(dedup, key, step.blocks).await
}

/// Persists blocks in order. Returns how many were new.
async fn record_blocks(dedup: &DedupStore, key: &WatchKey, blocks: Vec<ExtractedBlock>) -> usize {
    let mut recorded = 0;
    for block in blocks {
        let mut event = ErrorEvent::from_block(&key.agent, &key.service, block);
        match dedup.record(&mut event).await {
            Ok(true) => recorded += 1,
            Ok(false) => {}
            Err(e) => {
                error!(service = %key.service, error = %e, "failed to persist error event");
            }
        }
    }
    recorded
}
