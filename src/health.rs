//! Periodic health checks of the configured webapp URLs.

use crate::config::types::HealthConfig;
use crate::config::PathStore;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    /// Response time; absent when the check failed.
    pub ms: Option<u64>,
    pub last_check: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct HealthMonitor {
    client: reqwest::Client,
    paths: Arc<PathStore>,
    interval: Duration,
    results: RwLock<BTreeMap<String, HealthStatus>>,
}

impl HealthMonitor {
    pub fn new(paths: Arc<PathStore>, config: &HealthConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            paths,
            interval: config.interval,
            results: RwLock::new(BTreeMap::new()),
        })
    }

    /// Latest result per service.
    pub async fn results(&self) -> BTreeMap<String, HealthStatus> {
        self.results.read().await.clone()
    }

    /// Checks every configured webapp concurrently and replaces the results.
    /// Services no longer configured are dropped.
    pub async fn check_all(&self) {
        let webapps = self.paths.webapps();
        let checks = webapps.iter().map(|(service, url)| async move {
            let status = self.check(url).await;
            if status.ok {
                debug!(service = %service, ms = ?status.ms, "webapp healthy");
            } else {
                warn!(service = %service, url = %url, error = ?status.error, "webapp check failed");
            }
            (service.clone(), status)
        });
        let fresh: BTreeMap<String, HealthStatus> = join_all(checks).await.into_iter().collect();

        *self.results.write().await = fresh;
    }

    /// One bounded request. Any response outside 2xx counts as a failure.
    pub async fn check(&self, url: &str) -> HealthStatus {
        let started = Instant::now();
        let outcome = match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(format!("HTTP {}", resp.status())),
            Err(e) if e.is_timeout() => Err("timed out".to_string()),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(()) => HealthStatus {
                ok: true,
                ms: Some(started.elapsed().as_millis() as u64),
                last_check: Utc::now(),
                error: None,
            },
            Err(error) => HealthStatus {
                ok: false,
                ms: None,
                last_check: Utc::now(),
                error: Some(error),
            },
        }
    }

    /// Runs [`check_all`](Self::check_all) every interval, starting now.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, "webapp health monitor started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.check_all().await,
                }
            }
            debug!("webapp health monitor stopped");
        })
    }
}
