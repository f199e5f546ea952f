//! Reconnecting viewer for the `/logs` stream.

use super::Frame;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    Url(String),

    #[error("server reported: {0}")]
    Server(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Linear backoff: attempt `n` waits `base_delay × n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

/// What to stream. `file` takes precedence over `service` on the server.
#[derive(Debug, Clone, Default)]
pub struct StreamTarget {
    pub service: Option<String>,
    pub file: Option<String>,
    pub backlog: Option<usize>,
}

/// How one connection ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    ServerError(String),
    /// Closed without an error frame; counts as unexpected.
    Dropped { frames: usize, reason: String },
}

pub struct TailClient {
    url: String,
    policy: RetryPolicy,
}

impl TailClient {
    /// `server` is the base `ws://` or `wss://` address of an agent.
    pub fn new(server: &str, api_key: &str, target: &StreamTarget, policy: RetryPolicy) -> Result<Self, ClientError> {
        let url = stream_url(server, api_key, target)?;
        Ok(Self { url, policy })
    }

    /// Connects and hands every line to `on_line` until cancelled, until the
    /// server sends an error frame, or until retries run out. A connection
    /// that delivered at least one frame resets the attempt counter.
    pub async fn run<F>(&self, cancel: CancellationToken, mut on_line: F) -> Result<(), ClientError>
    where
        F: FnMut(&str),
    {
        let mut attempt: u32 = 0;

        loop {
            let reason = match self.session(&cancel, &mut on_line).await {
                SessionEnd::Cancelled => return Ok(()),
                SessionEnd::ServerError(message) => return Err(ClientError::Server(message)),
                SessionEnd::Dropped { frames, reason } => {
                    if frames > 0 {
                        attempt = 0;
                    }
                    reason
                }
            };

            attempt += 1;
            if !self.policy.allows(attempt) {
                return Err(ClientError::RetriesExhausted {
                    attempts: self.policy.max_attempts,
                    last: reason,
                });
            }

            let delay = self.policy.delay(attempt);
            warn!(attempt, max = self.policy.max_attempts, delay = ?delay, reason = %reason, "stream lost, reconnecting");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn session<F>(&self, cancel: &CancellationToken, on_line: &mut F) -> SessionEnd
    where
        F: FnMut(&str),
    {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
        };
        let mut ws = match connected {
            Ok((ws, _response)) => ws,
            Err(e) => {
                return SessionEnd::Dropped {
                    frames: 0,
                    reason: e.to_string(),
                }
            }
        };
        info!("connected to log stream");

        let mut frames = 0;
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return SessionEnd::Cancelled;
                }
                message = ws.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => {
                    frames += 1;
                    match serde_json::from_str::<Frame>(&text) {
                        Ok(Frame::Line(line)) => on_line(&line),
                        Ok(Frame::Error(message)) => return SessionEnd::ServerError(message),
                        Err(e) => debug!(error = %e, "ignoring malformed frame"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return SessionEnd::Dropped {
                        frames,
                        reason: "connection closed".to_string(),
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return SessionEnd::Dropped {
                        frames,
                        reason: e.to_string(),
                    }
                }
            }
        }
    }
}

/// Builds `<server>/logs?service=..&file=..&backlog=..&key=..`.
pub fn stream_url(server: &str, api_key: &str, target: &StreamTarget) -> Result<String, ClientError> {
    let mut url = reqwest::Url::parse(server).map_err(|e| ClientError::Url(format!("{}: {}", server, e)))?;
    match url.scheme() {
        "ws" | "wss" => {}
        "http" => url.set_scheme("ws").map_err(|_| ClientError::Url(server.to_string()))?,
        "https" => url.set_scheme("wss").map_err(|_| ClientError::Url(server.to_string()))?,
        other => return Err(ClientError::Url(format!("unsupported scheme {}", other))),
    }
    url.set_path("/logs");

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        if let Some(service) = &target.service {
            query.append_pair("service", service);
        }
        if let Some(file) = &target.file {
            query.append_pair("file", file);
        }
        if let Some(backlog) = target.backlog {
            query.append_pair("backlog", &backlog.to_string());
        }
        query.append_pair("key", api_key);
    }

    Ok(url.to_string())
}
