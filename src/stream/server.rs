//! The `/logs` websocket endpoint.
//!
//! Every connection owns its own file watch, reader and line buffer, so
//! viewers of the same file share nothing and the error-extraction
//! watchers are never touched.

use super::Frame;
use crate::config::{expand_tilde, PathStore, StreamConfig};
use crate::source::{read_last_lines, FileWatch, LineBuffer, TailReader, WatchEvent, WatchOptions};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct StreamState {
    pub paths: Arc<PathStore>,
    pub agent: String,
    pub config: StreamConfig,
    pub watch: WatchOptions,
}

/// Connection parameters. `file` wins over `service`; `key` is consumed by
/// the auth layer.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StreamParams {
    pub service: Option<String>,
    pub file: Option<String>,
    pub backlog: Option<usize>,
}

pub fn router(state: Arc<StreamState>) -> Router {
    Router::new()
        .route("/logs", get(logs_ws))
        .with_state(state)
}

async fn logs_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<StreamState>>,
    Query(params): Query<StreamParams>,
) -> Response {
    ws.on_upgrade(move |socket| stream_logs(socket, state, params))
}

impl StreamState {
    /// Resolves the file a connection asked for. The error text is sent to
    /// the viewer as-is.
    pub fn resolve(&self, params: &StreamParams) -> Result<PathBuf, String> {
        let path = match (&params.file, &params.service) {
            (Some(file), _) if !file.trim().is_empty() => expand_tilde(std::path::Path::new(file.trim())),
            (_, Some(service)) => self
                .paths
                .log_path(&self.agent, service)
                .ok_or_else(|| format!("no log file configured for service {}", service))?,
            _ => return Err("missing service or file parameter".to_string()),
        };

        if !path.is_file() {
            return Err(format!("log file not found: {}", path.display()));
        }
        Ok(path)
    }

    pub fn backlog_lines(&self, params: &StreamParams) -> usize {
        params
            .backlog
            .unwrap_or(self.config.backlog_lines)
            .min(self.config.max_backlog_lines)
    }
}

async fn stream_logs(mut socket: WebSocket, state: Arc<StreamState>, params: StreamParams) {
    let path = match state.resolve(&params) {
        Ok(path) => path,
        Err(message) => {
            warn!(service = ?params.service, file = ?params.file, error = %message, "rejected log stream");
            close_with_error(&mut socket, message).await;
            return;
        }
    };

    // Subscribe before sizing the file, so nothing written after the size
    // is taken goes unnoticed.
    let mut watch = match FileWatch::subscribe(&path, state.watch) {
        Ok(watch) => watch,
        Err(e) => {
            close_with_error(&mut socket, e.to_string()).await;
            return;
        }
    };
    let size = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            close_with_error(&mut socket, format!("failed to read {}: {}", path.display(), e)).await;
            return;
        }
    };

    let backlog = state.backlog_lines(&params);
    let lines = match read_last_lines(&path, size, backlog).await {
        Ok(lines) => lines,
        Err(e) => {
            close_with_error(&mut socket, format!("failed to read {}: {}", path.display(), e)).await;
            return;
        }
    };

    info!(path = %path.display(), backlog = lines.len(), "log stream connected");
    for line in lines {
        if send(&mut socket, Frame::Line(line)).await.is_err() {
            return;
        }
    }

    let mut reader = TailReader::at_offset(&path, size);
    let mut pending = LineBuffer::new();

    loop {
        tokio::select! {
            event = watch.next() => {
                match event {
                    Some(WatchEvent::Changed) => {}
                    Some(WatchEvent::Removed) if path.exists() => {}
                    Some(WatchEvent::Removed) => {
                        close_with_error(&mut socket, format!("log file removed: {}", path.display())).await;
                        return;
                    }
                    Some(WatchEvent::Error(e)) => {
                        close_with_error(&mut socket, format!("watch failed: {}", e)).await;
                        return;
                    }
                    None => {
                        close_with_error(&mut socket, "watch stopped".to_string()).await;
                        return;
                    }
                }

                let delta = match reader.read_delta().await {
                    Ok(delta) => delta,
                    Err(e) => {
                        close_with_error(&mut socket, e.to_string()).await;
                        return;
                    }
                };
                if delta.truncated {
                    debug!(path = %path.display(), offset = reader.offset(), "stream source truncated");
                    pending.clear();
                    continue;
                }
                // Blank lines are skipped, as in the backlog.
                for line in pending.push(&delta.bytes).into_iter().filter(|l| !l.trim().is_empty()) {
                    if send(&mut socket, Frame::Line(line)).await.is_err() {
                        return;
                    }
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        debug!(path = %path.display(), "log stream disconnected");
                        return;
                    }
                    // Server-push only; anything else from the viewer is ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn send(socket: &mut WebSocket, frame: Frame) -> Result<(), axum::Error> {
    socket.send(Message::Text(frame.to_json())).await
}

async fn close_with_error(socket: &mut WebSocket, message: String) {
    let _ = send(socket, Frame::Error(message)).await;
    let _ = socket.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state(dir: &TempDir) -> StreamState {
        StreamState {
            paths: Arc::new(PathStore::new(
                dir.path().join("log_paths.json"),
                dir.path().join("webapps.json"),
            )),
            agent: "host".to_string(),
            config: StreamConfig {
                backlog_lines: 250,
                max_backlog_lines: 1000,
            },
            watch: WatchOptions::default(),
        }
    }

    fn params(service: Option<&str>, file: Option<&str>, backlog: Option<usize>) -> StreamParams {
        StreamParams {
            service: service.map(str::to_string),
            file: file.map(str::to_string),
            backlog,
        }
    }

    #[test]
    fn test_resolve_by_service() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let log = dir.path().join("app.log");
        std::fs::write(&log, "x\n").unwrap();
        state.paths.set_log_path("host", "appserver", &log).unwrap();

        assert_eq!(state.resolve(&params(Some("appserver"), None, None)).unwrap(), log);
        let err = state.resolve(&params(Some("other"), None, None)).unwrap_err();
        assert!(err.contains("other"));
    }

    #[test]
    fn test_resolve_file_wins_and_must_exist() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let log = dir.path().join("direct.log");
        std::fs::write(&log, "x\n").unwrap();
        let file = log.to_string_lossy().into_owned();

        assert_eq!(state.resolve(&params(Some("appserver"), Some(&file), None)).unwrap(), log);

        let missing = dir.path().join("missing.log").to_string_lossy().into_owned();
        assert!(state.resolve(&params(None, Some(&missing), None)).unwrap_err().contains("not found"));
        assert!(state.resolve(&params(None, None, None)).is_err());
    }

    #[test]
    fn test_backlog_is_capped() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        assert_eq!(state.backlog_lines(&params(None, None, None)), 250);
        assert_eq!(state.backlog_lines(&params(None, None, Some(3))), 3);
        assert_eq!(state.backlog_lines(&params(None, None, Some(50_000))), 1000);
    }
}
